// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

// The engine is loaded at runtime with libloading, so nothing is linked
// here; rebuild when the declared ABI changes.

fn main() {
    println!("cargo:rerun-if-changed=../../include/mfc_engine.h");
}
