//! Effects the core asks its shell to perform: catalog HTTP, the local
//! movie cache, background jobs and rendering.

mod http;
mod records;
mod scheduler;

pub use crux_core::render::Render;
pub use crux_http::Http;

#[cfg(feature = "native-http")]
pub use self::http::ReqwestTransport;
pub use self::http::{
    into_http_result, HttpError, HttpTransport, ValidatedUrl, MAX_RESPONSE_BODY_SIZE,
    MAX_TIMEOUT_MS,
};
pub use self::records::{Records, RecordsError, RecordsOperation, RecordsOutput, RecordsResult};
pub use self::scheduler::{
    NetworkConstraint, SchedulerError, TaskDescriptor, TaskId, TaskInput, TaskOperation,
    TaskScheduler, Tasks, WorkOutcome,
};

use crate::coordinator::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub render: Render<Event>,
    pub records: Records<Event>,
    pub tasks: Tasks<Event>,
}
