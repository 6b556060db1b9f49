//! Build script for sbc-relay.
//!
//! When the `libsbc` feature is enabled, links the system SBC encoder
//! (`libsbc.so`, shipped by BlueZ-based distributions as `libsbc-dev` /
//! `sbc-devel`).

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=SBC_LIB_DIR");

    if env::var("CARGO_FEATURE_LIBSBC").is_ok() {
        link_libsbc();
    }
}

fn link_libsbc() {
    // Non-standard install prefixes can point the linker at the library.
    if let Ok(dir) = env::var("SBC_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }

    println!("cargo:rustc-link-lib=dylib=sbc");
}
