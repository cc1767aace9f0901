pub mod builder;
pub mod dispatcher;
pub mod handler;
pub mod listener;

pub use builder::ServerBuilder;
pub use dispatcher::Dispatcher;
pub use handler::RequestHandler;
