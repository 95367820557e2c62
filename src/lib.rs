pub mod io;
pub mod kernel;
