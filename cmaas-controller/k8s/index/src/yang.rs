//! YANG header scanning.
//!
//! Only the module header is read: module (or submodule) name, namespace,
//! prefix and, for models carrying configuration, the top-level container or
//! list. Identifiers are qualified with the owning NF id so that models of
//! different network functions never collide.

use cmaas_controller_core::{ModelRef, RootKind, YangModel};

pub const YANG_EXTENSION: &str = ".yang";
const REVISION_MARKER: &str = "_rev_";

pub fn is_yang_key(key: &str) -> bool {
    key.ends_with(YANG_EXTENSION)
}

/// The JSON data key paired with a YANG file, e.g. `app_rev_1.yang` pairs with `app.json`.
pub fn data_key_for(yang_file: &str) -> String {
    let stem = match yang_file.find(REVISION_MARKER) {
        Some(idx) => &yang_file[..idx],
        None => yang_file.strip_suffix(YANG_EXTENSION).unwrap_or(yang_file),
    };
    format!("{stem}.json")
}

/// Scans the header of `content`.
///
/// `has_data` indicates that the ConfigMap carries the JSON data key paired
/// with this file, in which case the model root is also resolved.
pub fn scan(yang_file: &str, content: &str, nf_id: &str, has_data: bool) -> YangModel {
    let default_module = yang_file.strip_suffix(YANG_EXTENSION).unwrap_or(yang_file);
    let mut model = YangModel {
        yang_file: yang_file.to_string(),
        module: format!("{default_module}-{nf_id}"),
        namespace: None,
        prefix: None,
        data_key: has_data.then(|| data_key_for(yang_file)),
        root: None,
    };

    let limit = if has_data { 4 } else { 3 };
    let mut found = 0;
    let mut root = None;
    for line in content.lines().map(str::trim) {
        if found == limit {
            break;
        }
        if let Some(name) = statement(line, "submodule", '{') {
            model.module = format!("{name}-{nf_id}");
            found += 1;
        } else if let Some(name) = statement(line, "module", '{') {
            model.module = format!("{name}-{nf_id}");
            found += 1;
        } else if let Some(ns) = statement(line, "namespace", ';') {
            model.namespace = Some(format!("{}:{nf_id}", ns.replace('"', "")));
            found += 1;
        } else if let Some(prefix) = statement(line, "prefix", ';') {
            model.prefix = Some(format!("{}-{nf_id}", prefix.replace('"', "")));
            found += 1;
        } else if found == 3 {
            if let Some(name) = statement(line, "container", '{') {
                root = Some((name.to_string(), RootKind::Container));
                found += 1;
            } else if let Some(name) = statement(line, "list", '{') {
                root = Some((name.to_string(), RootKind::List));
                found += 1;
            }
        }
    }

    if let (Some((root, kind)), Some(prefix)) = (root, model.prefix.clone()) {
        model.root = Some(ModelRef { prefix, root, kind });
    }
    model
}

/// Extracts the argument of a `keyword <arg> <terminator>` statement.
fn statement<'l>(line: &'l str, keyword: &str, terminator: char) -> Option<&'l str> {
    let rest = line.strip_prefix(keyword)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let end = rest.find(terminator)?;
    let arg = rest[..end].trim();
    (!arg.is_empty()).then_some(arg)
}
