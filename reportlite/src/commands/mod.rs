pub mod build;
pub mod next;
pub mod run;
pub mod verify;
