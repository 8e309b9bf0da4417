#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod basis;
pub mod broadcast;
pub mod index;
pub mod linalg;
pub mod model;
pub mod special;
pub mod volume;
