pub mod aggregate;
pub mod graph;
pub mod optimize;
pub mod pf;
pub mod radialize;
pub mod util;
pub mod validate;
