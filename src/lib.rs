//! Core library for the vesla-rollup workbook builder.
//!
//! Callers declare named, typed cells on ordered sheets and combine them with
//! a small closed set of formula operators. Assembly resolves every reference,
//! rejects cycles and forward cross-sheet references, evaluates each computed
//! cell once, and emits a model that a rendering backend writes out. Cell
//! declarations live under [`vesla::rollup::model`], expressions in
//! [`vesla::rollup::formula`], assembly in [`vesla::rollup::assemble`], and the
//! file adapters under [`vesla::rollup::io`].

pub mod vesla;

pub use vesla::rollup::{
    ModelError, Result, ToolError, assemble, emitted, error, formula, io, model, recalc, render,
    resolve,
};
