//! Wire models for the image upload API.
//!
//! These serialize with the field names PicGo-style clients expect
//! (`imgURL`, `fullResult`, ...).

pub mod upload;
