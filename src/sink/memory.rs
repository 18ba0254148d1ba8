use std::sync::{Arc, Mutex, PoisonError};

use super::{PointSink, SinkError};
use crate::model::Point;

/// Keeps every written batch in memory. Clones share the same storage, so one
/// handle can be given to each worker and inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<Point>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Point>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All points across batches, in write order
    pub fn points(&self) -> Vec<Point> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PointSink for MemorySink {
    fn write_points(&mut self, points: &[Point]) -> Result<(), SinkError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(points.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_storage() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        handle.write_points(&[]).unwrap();
        handle.write_points(&[]).unwrap();
        assert_eq!(sink.batch_count(), 2);
        assert!(sink.points().is_empty());
    }
}
