use regex::Regex;

/// Separates an asset path from its trailing parameter text, as in `model.dae:skin`.
pub const PARAMETER_DIVIDER: char = ':';

/// Accepts both forward and back slashes; output paths always use `/`.
pub fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Split a leading drive specifier (`C:`) from the rest of the path. The colon must end
/// the path or be followed by a separator, so a one letter name such as `a:p1` is not a
/// drive.
fn split_drive(path: &str) -> (&str, &str) {
    let bytes = path.as_bytes();
    let is_drive = bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && bytes.get(2).map_or(true, |&c| is_separator(c as char));
    if is_drive {
        path.split_at(2)
    } else {
        ("", path)
    }
}

/// Split `path` at the parameter divider into `(path, suffix)`, where the suffix keeps the
/// divider itself. A drive letter colon is never treated as a divider.
///
/// ```
/// # use xle_assets::paths::split_parameters;
/// assert_eq!(split_parameters("model.dae:p1"), ("model.dae", ":p1"));
/// assert_eq!(split_parameters("C:/art/model.dae"), ("C:/art/model.dae", ""));
/// assert_eq!(split_parameters("C:/art/model.dae:p1"), ("C:/art/model.dae", ":p1"));
/// assert_eq!(split_parameters("a:p1"), ("a", ":p1"));
/// ```
pub fn split_parameters(path: &str) -> (&str, &str) {
    let (drive, rest) = split_drive(path);
    match rest.find(PARAMETER_DIVIDER) {
        Some(idx) => path.split_at(drive.len() + idx),
        None => (path, ""),
    }
}

/// Lexically collapse `.` and `..` segments and repeated separators.
///
/// No filesystem access is performed. Leading `..` segments of relative paths are kept,
/// `..` above the root of an absolute path is dropped.
///
/// ```
/// # use xle_assets::paths::simplify_path;
/// assert_eq!(simplify_path("/project/./assets/../fallback//tex.dds"), "/project/fallback/tex.dds");
/// assert_eq!(simplify_path("../shared/./x"), "../shared/x");
/// assert_eq!(simplify_path("C:\\art\\..\\maps\\a.txt"), "C:/maps/a.txt");
/// ```
pub fn simplify_path(path: &str) -> String {
    let (drive, rest) = split_drive(path);
    let absolute = rest.starts_with(is_separator);

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split(is_separator) {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            _ => segments.push(segment),
        }
    }

    let mut result = String::with_capacity(path.len());
    result.push_str(drive);
    if absolute {
        result.push('/');
    }
    result.push_str(&segments.join("/"));
    result
}

/// Join a directory and a relative name with exactly one separator between them.
pub fn concat_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    let trimmed = dir.trim_end_matches(is_separator);
    let name = name.trim_start_matches(is_separator);
    let mut result = String::with_capacity(trimmed.len() + name.len() + 1);
    result.push_str(trimmed);
    result.push('/');
    result.push_str(name);
    result
}

/// The directory component of `filename`, or an empty string when it has none.
///
/// ```
/// # use xle_assets::paths::dirname;
/// assert_eq!(dirname("/project/assets/tex.dds"), "/project/assets");
/// assert_eq!(dirname("tex.dds"), "");
/// assert_eq!(dirname("/tex.dds"), "/");
/// ```
pub fn dirname(filename: &str) -> &str {
    match filename.rfind(is_separator) {
        Some(0) => &filename[..1],
        Some(idx) => &filename[..idx],
        None => "",
    }
}

/// Compile a `*`/`?` wildcard into an anchored regex.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');
    Regex::new(&expr)
}
