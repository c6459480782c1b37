//! Architecture-specific context switching
//!
//! Each backend provides the same five items: `SavedRegs`,
//! `init_context`, `context_switch`, `context_switch_release` and
//! `context_jump`.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::*;
    } else {
        compile_error!("Unsupported architecture");
    }
}
