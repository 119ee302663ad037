//! Best-effort static reference scan.
//!
//! Decides which project files a plain script needs by looking for their
//! names in its text. Files used only indirectly are missed.

/// Project files that `script` appears to reference, in `project_files` order.
///
/// A file counts as referenced when its name appears in single or double
/// quotes. A `.py` file also counts when its module name follows `import `
/// or `from ` (which covers `import mod.sub` as well). `script_name` itself
/// is never returned.
pub fn referenced_files<'a>(
    script: &str,
    script_name: &str,
    project_files: &'a [String],
) -> Vec<&'a str> {
    project_files
        .iter()
        .map(String::as_str)
        .filter(|name| *name != script_name && is_referenced(script, name))
        .collect()
}

fn is_referenced(script: &str, file_name: &str) -> bool {
    if script.contains(&format!("'{file_name}'")) || script.contains(&format!("\"{file_name}\"")) {
        return true;
    }
    match file_name.strip_suffix(".py") {
        Some(module) if !module.is_empty() => {
            script.contains(&format!("import {module}")) || script.contains(&format!("from {module}"))
        }
        _ => false,
    }
}
