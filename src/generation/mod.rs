pub mod coordinator;
pub mod events;
pub mod job;
pub mod page;
pub mod sink;

pub use coordinator::{
    new_task_id, CoordinatorSettings, GenerationCoordinator, GenerationReport, GenerationRequest,
    DEFAULT_RETAINED_TASKS,
};
pub use events::{ProgressEvent, SseEvent};
pub use job::{ImageOptions, JobOutcome, PageImageJob, DEFAULT_IMAGE_TIMEOUT};
pub use page::{
    ConcurrencyMode, GenerationSummary, Page, PageResult, PageStatus, PageType, MAX_CONCURRENCY,
};
pub use sink::{EventSink, DEFAULT_EVENT_BUFFER};
