// phc — Phasor Compiler
//
// Library root. Compiles loop/assignment IR into a block-diagonal affine
// phasor system with halting guards, and simulates it.

pub mod address;
pub mod affine;
pub mod artifact;
pub mod ast;
pub mod diag;
pub mod eval;
pub mod expand;
pub mod guard;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod linear;
pub mod parser;
pub mod pass;
pub mod phasor;
pub mod pipeline;
pub mod simulate;
