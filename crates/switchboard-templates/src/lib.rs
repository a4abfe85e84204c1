pub mod registry;
pub mod substitute;

pub use registry::TemplateRegistry;
pub use substitute::substitute;
