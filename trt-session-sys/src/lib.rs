//! Raw FFI bindings to the TensorRT runtime and CUDA memory API
//!
//! This crate provides low-level, unsafe bindings to a small C ABI
//! (`wrapper.hpp`) covering engine deserialization, I/O tensor
//! introspection, execution and device memory management.
//! For the safe session API, use the `trt-session` crate instead.
//!
//! Building with the `mock` feature (or without a TensorRT installation)
//! links a host-memory implementation instead of TensorRT and CUDA.
//!
//! # Safety
//!
//! All functions in this crate are `unsafe` as they directly call into C/C++ code
//! and perform no safety checks. Callers must ensure:
//!
//! - Pointers are valid and properly aligned
//! - Lifetimes are managed correctly (context before engine before runtime)
//! - Thread safety requirements are met
//! - CUDA context is properly initialized

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

// Include the generated bindings
include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
