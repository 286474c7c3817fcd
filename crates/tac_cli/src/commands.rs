//! Subcommand implementations (§4.8). Each command reads one or more IR
//! tuple-syntax files into a shared linkage, runs `infer`+`check` on every
//! function, then performs its own command-specific output step.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tac_codegen_x64::Target;
use tac_ir::{FunctionIr, Linkage};

/// Parse every file into one shared linkage, in argument order (§4.1:
/// "multiple files sharing a Linkage can reference each other's types").
fn build_linkage(files: &[PathBuf]) -> Result<Linkage> {
    let mut linkage = Linkage::new();
    for path in files {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        tac_parser::parse_into(&source, &mut linkage)
            .with_context(|| format!("failed to parse {}", path.display()))?;
    }
    Ok(linkage)
}

/// Run inference then checking over every function already registered in
/// `linkage`. `FunctionIr` doesn't borrow its `Linkage` back, so each
/// function is taken out, processed, and written back (§3: "the weak
/// linkage back-reference is dropped").
fn typecheck_all(linkage: &mut Linkage) -> Result<()> {
    for idx in 0..linkage.functions().len() {
        let mut func: FunctionIr = linkage.functions()[idx].clone();
        tac_typeck::infer(&mut func, linkage)?;
        tac_typeck::check(&mut func, linkage)?;
        linkage.functions_mut()[idx] = func;
    }
    Ok(())
}

fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("failed to write {}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

pub fn check(files: Vec<PathBuf>) -> Result<()> {
    let mut linkage = build_linkage(&files)?;
    typecheck_all(&mut linkage)?;
    for name in linkage.unresolved_forward_refs() {
        log::warn!("type `{name}` is forward-referenced but never defined (fine here; fatal once lowering is requested)");
    }
    log::info!("checked {} function(s) across {} file(s)", linkage.functions().len(), files.len());
    println!("ok");
    Ok(())
}

pub fn emit_ir(files: Vec<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let mut linkage = build_linkage(&files)?;
    typecheck_all(&mut linkage)?;
    let text = tac_parser::print_linkage(&linkage);
    write_output(output.as_deref(), &text)
}

pub fn emit_c(files: Vec<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let mut linkage = build_linkage(&files)?;
    typecheck_all(&mut linkage)?;
    let text = tac_codegen_c::emit_c(&linkage)?;
    write_output(output.as_deref(), &text)
}

pub fn emit_x64(files: Vec<PathBuf>, output: Option<PathBuf>, target: String) -> Result<()> {
    let target = parse_target(&target)?;
    let mut linkage = build_linkage(&files)?;
    typecheck_all(&mut linkage)?;
    let text = tac_codegen_x64::emit_x64(&linkage, target)?;
    write_output(output.as_deref(), &text)
}

pub fn scalarize_emit_c(files: Vec<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let mut linkage = build_linkage(&files)?;
    typecheck_all(&mut linkage)?;

    for idx in 0..linkage.functions().len() {
        let mut func: FunctionIr = linkage.functions()[idx].clone();
        let rewritten = tac_scalarize::scalarize(&mut func, &mut linkage)?;
        if rewritten > 0 {
            tac_typeck::check(&mut func, &linkage)?;
        }
        linkage.functions_mut()[idx] = func;
    }

    let text = tac_codegen_c::emit_c(&linkage)?;
    write_output(output.as_deref(), &text)
}

fn parse_target(name: &str) -> Result<Target> {
    match name {
        "native" => Ok(Target::native()),
        "linux" => Ok(Target::Linux),
        "windows" => Ok(Target::Windows),
        other => anyhow::bail!("unknown target {other:?}, expected native, linux, or windows"),
    }
}
