//! Panic capture

use crate::exception::{trim_collector_frames, CapturedError};
use crate::frames::capture_frames;
use crate::unit::UnitOfWork;
use std::sync::Once;

/// Type name reported for panics
pub const PANIC_TYPE: &str = "panic";

/// Install a process-wide panic hook that records panics on the panicking
/// task's unit of work. The previously installed hook still runs afterwards.
/// Calling this more than once has no further effect.
///
/// A panic raised while the unit's collector is locked is not recorded.
pub fn install_panic_capture() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(unit) = UnitOfWork::current() {
                let payload = info.payload();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Box<dyn Any>".to_string());

                let (file, line) = info
                    .location()
                    .map(|location| (location.file().to_string(), location.line()))
                    .unwrap_or_else(|| ("unknown".to_string(), 0));

                let error = CapturedError::new(PANIC_TYPE, message, file, line)
                    .with_frames(trim_collector_frames(capture_frames()));
                unit.try_record_error(&error);
            }

            previous(info);
        }));
    });
}
