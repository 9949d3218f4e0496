pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod work;

pub use config::CollectorConfig;
pub use error::{ApexError, Result};
pub use crate::http::{HttpRequest, HttpResponse};
pub use work::{WorkInfo, WorkKind};
