mod builder;
mod node;

pub use builder::*;
pub use node::*;

#[cfg(test)]
mod builder_test;
#[cfg(test)]
mod node_test;
