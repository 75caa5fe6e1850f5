#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]

//! Device side of the update engine: the persisted bank configuration and
//! the task body that runs an accepted update and resets into the new bank.

pub mod system_data;
pub mod update_task;

pub use system_data::SystemDataStore;
pub use update_task::{Reset, execute_http_update, execute_update};
