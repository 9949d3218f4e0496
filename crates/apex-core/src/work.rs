use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of execution a unit of work wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    Http,
    Console,
    Queue,
}

/// Identity and timing of one collection cycle.
///
/// Ids are UUIDv7 so they sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkInfo {
    pub id: Uuid,
    pub kind: WorkKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkInfo {
    pub fn new(kind: WorkKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_info_new() {
        let info = WorkInfo::new(WorkKind::Http);
        assert!(!info.id.is_nil());
        assert_eq!(info.id.get_version_num(), 7);
        assert!(info.end_time.is_none());
    }

    #[test]
    fn test_work_ids_are_time_ordered() {
        let first = WorkInfo::new(WorkKind::Console);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = WorkInfo::new(WorkKind::Console);
        assert!(first.id < second.id);
    }

    #[test]
    fn test_finish_sets_end_time() {
        let mut info = WorkInfo::new(WorkKind::Queue);
        info.finish();
        let end = info.end_time.unwrap();
        assert!(end >= info.start_time);
    }
}
