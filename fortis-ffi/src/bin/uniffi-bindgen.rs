// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

fn main() {
    uniffi::uniffi_bindgen_main()
}
