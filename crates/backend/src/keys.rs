//! Key descriptors for `Input.dispatchKeyEvent` payloads.

/// Everything CDP needs to synthesize one key.
#[derive(Clone, Debug)]
pub struct KeyDescriptor {
    pub key: String,
    pub code: String,
    pub text: Option<String>,
    pub windows_virtual_key_code: i64,
}

/// Resolve a named key or a single character to its descriptor.
///
/// Named keys cover what the action grammar's `PRESS` accepts; anything
/// else is treated as literal text with no virtual key code, which CDP
/// still delivers through the `text` field.
pub fn key_descriptor(key: &str) -> KeyDescriptor {
    match key {
        "Enter" => named("Enter", "Enter", Some("\r"), 13),
        "Tab" => named("Tab", "Tab", Some("\t"), 9),
        "Escape" => named("Escape", "Escape", None, 27),
        "Backspace" => named("Backspace", "Backspace", None, 8),
        "Delete" => named("Delete", "Delete", None, 46),
        "ArrowUp" => named("ArrowUp", "ArrowUp", None, 38),
        "ArrowDown" => named("ArrowDown", "ArrowDown", None, 40),
        "ArrowLeft" => named("ArrowLeft", "ArrowLeft", None, 37),
        "ArrowRight" => named("ArrowRight", "ArrowRight", None, 39),
        "Home" => named("Home", "Home", None, 36),
        "End" => named("End", "End", None, 35),
        "PageUp" => named("PageUp", "PageUp", None, 33),
        "PageDown" => named("PageDown", "PageDown", None, 34),
        " " => named(" ", "Space", Some(" "), 32),
        other => char_descriptor(other),
    }
}

fn named(key: &str, code: &str, text: Option<&str>, vk: i64) -> KeyDescriptor {
    KeyDescriptor {
        key: key.to_string(),
        code: code.to_string(),
        text: text.map(str::to_string),
        windows_virtual_key_code: vk,
    }
}

/// Descriptor for one literal character from `type_text`.
pub fn char_descriptor(ch: &str) -> KeyDescriptor {
    let vk = ch
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase() as i64)
        .unwrap_or(0);
    KeyDescriptor {
        key: ch.to_string(),
        code: String::new(),
        text: Some(ch.to_string()),
        windows_virtual_key_code: vk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_carries_carriage_return_text() {
        let desc = key_descriptor("Enter");
        assert_eq!(desc.text.as_deref(), Some("\r"));
        assert_eq!(desc.windows_virtual_key_code, 13);
    }

    #[test]
    fn single_characters_pass_through_text() {
        let desc = key_descriptor("a");
        assert_eq!(desc.text.as_deref(), Some("a"));
        assert_eq!(desc.windows_virtual_key_code, 'A' as i64);

        let non_ascii = key_descriptor("é");
        assert_eq!(non_ascii.text.as_deref(), Some("é"));
        assert_eq!(non_ascii.windows_virtual_key_code, 0);
    }
}
