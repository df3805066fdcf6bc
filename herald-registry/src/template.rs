//! Variable substitution for subject and body templates.

use std::collections::BTreeMap;

/// Substitute `{{name}}` placeholders with values from the variables map.
///
/// Whitespace inside the braces is tolerated (`{{ name }}`). A placeholder
/// with no matching key passes through literally, so a missing variable shows
/// up in the delivered mail instead of failing the job. Rendering is pure and
/// side-effect-free; calling it again for a retry yields the same output.
#[must_use]
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        output.push_str(head);

        if let Some(end) = tail.find("}}") {
            let key = tail[2..end].trim();

            if let Some(value) = variables.get(key) {
                output.push_str(value);
            } else {
                output.push_str(&tail[..end + 2]);
            }

            rest = &tail[end + 2..];
        } else {
            // Unterminated opener, keep the remainder verbatim
            output.push_str(tail);
            rest = "";
        }
    }

    output.push_str(rest);
    output
}
