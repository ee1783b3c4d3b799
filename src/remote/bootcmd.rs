//! Boot command parsing.
//!
//! A boot command is a flat string of literal characters and `<special>`
//! tokens. Parsing turns it into a list of key actions the console session
//! types one by one.

use crate::error::RemoteError;
use std::time::Duration;

/// Placeholder replaced by `ip:port` of the HTTP file server.
pub const HTTP_ADDRESS_PLACEHOLDER: &str = "__HTTP__ADDRESS__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Esc,
    Backspace,
    Delete,
    Space,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    F(u8),
    LeftAlt,
    LeftCtrl,
    LeftShift,
    LeftSuper,
    RightAlt,
    RightCtrl,
    RightShift,
    RightSuper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Press and release.
    Press(Key),
    /// Hold a key until the matching `Release`.
    Hold(Key),
    Release(Key),
    Wait(Duration),
}

/// Values substituted into a boot command before parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootVars {
    pub http_ip: String,
    pub http_port: u16,
}

/// Join the configured lines and substitute the HTTP server address.
pub fn render(lines: &[String], vars: &BootVars) -> String {
    let port = vars.http_port.to_string();
    lines
        .concat()
        .replace(HTTP_ADDRESS_PLACEHOLDER, &format!("{}:{}", vars.http_ip, port))
        .replace("{{ .HTTPIP }}", &vars.http_ip)
        .replace("{{.HTTPIP}}", &vars.http_ip)
        .replace("{{ .HTTPPort }}", &port)
        .replace("{{.HTTPPort}}", &port)
}

/// Parse a rendered boot command into key actions.
///
/// Unknown `<...>` tokens are typed literally.
pub fn parse(command: &str) -> Result<Vec<KeyAction>, RemoteError> {
    let mut actions = Vec::new();
    let mut rest = command;

    while let Some(c) = rest.chars().next() {
        if c == '<' {
            if let Some(end) = rest.find('>') {
                let token = &rest[1..end];
                if let Some(action) = special(token)? {
                    actions.push(action);
                    rest = &rest[end + 1..];
                    continue;
                }
            }
        }
        actions.push(KeyAction::Press(Key::Char(c)));
        rest = &rest[c.len_utf8()..];
    }
    Ok(actions)
}

fn special(token: &str) -> Result<Option<KeyAction>, RemoteError> {
    let lower = token.to_ascii_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Enter,
        "tab" => Key::Tab,
        "esc" => Key::Esc,
        "bs" => Key::Backspace,
        "del" => Key::Delete,
        "spacebar" => Key::Space,
        "insert" => Key::Insert,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::Up,
        "down" => Key::Down,
        "left" => Key::Left,
        "right" => Key::Right,
        _ => {
            if let Some(wait) = lower.strip_prefix("wait") {
                return parse_wait(token, wait).map(Some);
            }
            if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                if (1..=12).contains(&n) {
                    return Ok(Some(KeyAction::Press(Key::F(n))));
                }
                return Ok(None);
            }
            return Ok(modifier(&lower));
        }
    };
    Ok(Some(KeyAction::Press(key)))
}

fn modifier(token: &str) -> Option<KeyAction> {
    let (name, hold) = if let Some(name) = token.strip_suffix("on") {
        (name, true)
    } else if let Some(name) = token.strip_suffix("off") {
        (name, false)
    } else {
        return None;
    };
    let key = match name {
        "leftalt" => Key::LeftAlt,
        "leftctrl" => Key::LeftCtrl,
        "leftshift" => Key::LeftShift,
        "leftsuper" => Key::LeftSuper,
        "rightalt" => Key::RightAlt,
        "rightctrl" => Key::RightCtrl,
        "rightshift" => Key::RightShift,
        "rightsuper" => Key::RightSuper,
        _ => return None,
    };
    Some(if hold {
        KeyAction::Hold(key)
    } else {
        KeyAction::Release(key)
    })
}

/// `<wait>` is one second, `<wait10>` ten seconds, `<wait5s>` / `<wait1m>` / `<wait500ms>` explicit.
fn parse_wait(token: &str, spec: &str) -> Result<KeyAction, RemoteError> {
    if spec.is_empty() {
        return Ok(KeyAction::Wait(Duration::from_secs(1)));
    }
    let digits_end = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    let (number, unit) = spec.split_at(digits_end);
    let value: u64 = number
        .parse()
        .map_err(|_| RemoteError::BootCommand(format!("invalid wait duration in <{}>", token)))?;
    let scaled = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| RemoteError::BootCommand(format!("wait duration too large in <{}>", token)))
    };
    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => scaled(60)?,
        "h" => scaled(3600)?,
        _ => {
            return Err(RemoteError::BootCommand(format!(
                "unknown wait unit '{}' in <{}>",
                unit, token
            )))
        }
    };
    Ok(KeyAction::Wait(duration))
}
