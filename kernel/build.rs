/// opnet kernel build script.
///
/// Links the kernel binary with `linker.ld` (higher-half layout plus the
/// Limine request sections).
fn main() {
    // Host builds (unit tests against the simulated NIC) use the normal
    // host link; only the bare-metal target needs the kernel layout.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "none" {
        return;
    }

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default();
    println!("cargo:rustc-link-arg-bins=-T{}/linker.ld", manifest_dir);
    println!("cargo:rerun-if-changed=linker.ld");
}
