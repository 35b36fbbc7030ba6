//! CLI command implementations.
//!
//! | Module    | Commands handled                     |
//! |-----------|--------------------------------------|
//! | `inspect` | `Classify`, `Context`, `Deps`, `Parse` |
//! | `run`     | `Run`                                |
//! | `config`  | `Config`                             |

pub mod config;
pub mod inspect;
pub mod run;

pub use config::cmd_config;
pub use inspect::{cmd_classify, cmd_context, cmd_deps, cmd_parse};
pub use run::{RunOptions, cmd_run};
