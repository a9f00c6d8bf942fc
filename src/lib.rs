pub mod cigar;
pub mod errors;
pub mod expand;
pub mod gaps;
pub mod io;
pub mod likelihood;
pub mod matrix;
pub mod model;
pub mod tree;
