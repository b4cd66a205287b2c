cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use x86_64::{init_stack, sea_fiber_switch, STACK_ALIGNMENT};
    } else {
        compile_error!("sea-fiber currently only implements a context switch for x86_64; see DESIGN.md Open Questions for the multi-arch tradeoff.");
    }
}
