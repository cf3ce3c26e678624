use std::env;

fn main() {
    println!("cargo:rerun-if-changed=linker.ld");

    // The linker script only applies to the freestanding i386 build; hosted
    // test builds link normally.
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_arch == "x86" && target_os == "none" {
        let manifest_dir =
            env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo");
        println!("cargo:rustc-link-arg=-T{}/linker.ld", manifest_dir);
    }
}
