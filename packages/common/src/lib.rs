pub mod types;

pub use types::{DeviceFlowResponse, PollStatus};
