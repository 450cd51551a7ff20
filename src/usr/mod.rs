//! usr — small programs written against `api/`

pub mod pingpong;
