use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=boot/long_mode.S");
    println!("cargo:rerun-if-changed=linker.ld");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    println!("cargo:rustc-link-arg-bin=mpboot=-T{}/linker.ld", manifest_dir);

    // Multiboot2 header, 32-bit entry and the AP trampoline.
    cc::Build::new()
        .file("boot/long_mode.S")
        .flag_if_supported("-fno-asynchronous-unwind-tables")
        .cargo_metadata(false)
        .compile("boot");

    // Link libboot.a exactly once, and keep every object in it.
    println!("cargo:rustc-link-search=native={}", out_dir.display());
    println!("cargo:rustc-link-arg-bin=mpboot=--whole-archive");
    println!("cargo:rustc-link-arg-bin=mpboot={}/libboot.a", out_dir.display());
    println!("cargo:rustc-link-arg-bin=mpboot=--no-whole-archive");
}
