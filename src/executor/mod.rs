//! Pipeline execution layer
//!
//! This module walks the execution tree, runs commands as child processes
//! and reports progress to an [`ExecutionListener`].

pub mod capture;
mod context;
pub mod ipc;
mod listener;
mod local;
pub mod shell;
mod step;
pub mod shutdown;
pub mod timeout;
mod traits;
mod tree;

pub use capture::{CaptureBuffer, apply_capture, captured_value, import_properties};
pub use context::{ENV_VERSION, RunContext};
pub use ipc::{
    ChannelFile, ChannelRegistry, ENV_IPC_IN, ENV_IPC_OUT, IpcChannel, create_channel_file,
};
pub use listener::{
    CompositeListener, ConsoleListener, ExecutionEvent, ExecutionListener, NodeInfo,
    RecordingListener, TracingListener,
};
pub use local::LocalExecutor;
pub use shell::{
    ProcessExecutor, ProcessOutcome, ProcessRequest, check_working_directory, command_arguments,
};
pub use shutdown::{CancelHandle, EXIT_CANCELLED};
pub use timeout::{ChildGuard, Deadline, ProcessGroups};
pub use traits::{PipelineExecutor, RunReport};
pub use tree::{EXECUTION_ERROR_EXIT_CODE, ExecutionNode, NodeReport};
