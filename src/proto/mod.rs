//! Protocol buffer definitions and generated code for the watch RPC service.
//!
//! The generated file is checked in under `src/generated`; see `build.rs` for
//! how to regenerate it from `proto/watch_service.proto`.

pub mod watchpb {
    include!("../generated/watchpb.rs");
}

mod watch_ext;


pub use watchpb::*;
