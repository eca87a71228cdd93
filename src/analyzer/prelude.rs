//! Everything grammar code needs in one import.

pub use super::combinators::{
    choice, delimited, lazy, located, many, map, optional, preceded, satisfy, separated_list,
    tuple2, tuple3, with_context,
};
