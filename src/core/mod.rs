// Core types shared by every component: errors and the response line.
pub mod error;
pub mod response;
