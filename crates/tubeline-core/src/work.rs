//! Work items and the sources that enumerate them

use std::collections::BTreeMap;

/// Named column values for one ledger row (stage columns only).
pub type Fields = BTreeMap<String, String>;

/// One unit of input requiring one external call.
///
/// `id` is derived from stable external identifiers (video id, comment key,
/// channel id), never from row position.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem<P> {
    pub id: String,
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(id: impl Into<String>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Produces the ordered work items for a stage.
///
/// Must not call rate-limited services. Re-invoking it reproduces the same
/// sequence for the same input. Malformed or missing input is an error,
/// never retried.
pub trait WorkSource {
    type Payload;

    fn enumerate(&self) -> anyhow::Result<Vec<WorkItem<Self::Payload>>>;
}

/// A fixed list, used when the items were fetched up front (search results).
impl<P: Clone> WorkSource for Vec<WorkItem<P>> {
    type Payload = P;

    fn enumerate(&self) -> anyhow::Result<Vec<WorkItem<P>>> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_is_restartable() {
        let source = vec![WorkItem::new("a", 1), WorkItem::new("b", 2)];
        let first = source.enumerate().unwrap();
        let second = source.enumerate().unwrap();
        assert_eq!(first, second);
        assert_eq!(first[1].id, "b");
    }
}
