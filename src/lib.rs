//! # Smali visitor
//!
//! A visitor based reader and writer for Android smali files.
//!
//! `SmaliReader` parses smali text and reports every construct to a `ClassVisitor` in
//! source order. `SmaliWriter` is a `ClassVisitor` that turns those calls back into
//! canonical smali, so reading into a writer reformats a file. Visitors can be chained
//! through delegates to filter or observe a stream on its way to a writer.
//!
//! The `esa` module decrypts the AES-CBC payload of Embedded Shared Archives.
//!
use std::path::{Path, PathBuf};

use crate::error::SmaliError;

#[macro_use]
pub mod error;
pub mod esa;
pub mod smali_lex;
pub mod smali_read;
pub mod smali_value;
pub mod smali_write;
mod tests;
pub mod types;
pub mod visitor;

pub use smali_read::{ErrorMode, ReaderOptions, SmaliReader};
pub use smali_write::SmaliWriter;

/// Recurses a base path, typically a 'smali' folder from apktool, returning the paths of all smali files found
///
/// # Examples
///
/// ```no_run
///  use smali_visitor::find_smali_files;
///  use std::path::Path;
///
///  let files = find_smali_files(Path::new("smali")).unwrap();
///  println!("{:} smali files found.", files.len());
/// ```
pub fn find_smali_files(dir: &Path) -> Result<Vec<PathBuf>, SmaliError> {
    let mut results = vec![];

    for entry in dir.read_dir()? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            // Directory: recurse sub-directory
            results.extend(find_smali_files(&path)?);
        } else if path.extension().map_or(false, |e| e == "smali") {
            results.push(path);
        }
    }
    results.sort();

    Ok(results)
}

/// Reads `source` into a fresh `SmaliWriter` and returns the regenerated smali
///
/// # Examples
///
/// ```
///  use smali_visitor::{format_smali, ReaderOptions};
///
///  let smali = format_smali(".class final public La/B;\n.super Ljava/lang/Object;\n", ReaderOptions::default()).unwrap();
///  assert_eq!(smali, ".class public final La/B;\n.super Ljava/lang/Object;\n");
/// ```
pub fn format_smali(source: &str, options: ReaderOptions) -> Result<String, SmaliError> {
    let mut writer = SmaliWriter::new();
    SmaliReader::new(options).visit(source, &mut writer)?;
    Ok(writer.code())
}
