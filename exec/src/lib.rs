pub mod container;
pub mod subprocess;

pub use container::ContainerExecDescriptor;
pub use container::ContainerExecResult;
pub use container::exec_in_container;
pub use subprocess::ProcessDescriptor;
pub use subprocess::ProcessResult;
pub use subprocess::SecureProcess;
