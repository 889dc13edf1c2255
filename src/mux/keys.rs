//! 按键转换
//!
//! 把界面按键转换成交互程序能理解的字节序列，并识别保留给界面的组合键。

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::config::KeyConfig;

const RELEVANT_MODIFIERS: KeyModifiers = KeyModifiers::SHIFT
    .union(KeyModifiers::CONTROL)
    .union(KeyModifiers::ALT);

/// 单个组合键，例如 `ctrl+]`、`alt+1`、`f5`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    code: KeyCode,
    modifiers: KeyModifiers,
}

impl KeyChord {
    pub fn new(code: KeyCode, modifiers: KeyModifiers) -> Self {
        normalize(code, modifiers)
    }

    pub fn matches(&self, event: &KeyEvent) -> bool {
        *self == normalize(event.code, event.modifiers)
    }

    /// 转换成按下事件，SHIFT + 字母还原为大写字母
    pub fn to_event(&self) -> KeyEvent {
        match self.code {
            KeyCode::Char(c) if c.is_ascii_lowercase() && self.modifiers.contains(KeyModifiers::SHIFT) => {
                KeyEvent::new(KeyCode::Char(c.to_ascii_uppercase()), self.modifiers)
            }
            code => KeyEvent::new(code, self.modifiers),
        }
    }
}

/// 大写字母统一成小写 + SHIFT
fn normalize(code: KeyCode, modifiers: KeyModifiers) -> KeyChord {
    let mut modifiers = modifiers & RELEVANT_MODIFIERS;
    let code = match code {
        KeyCode::Char(c) if c.is_ascii_uppercase() => {
            modifiers |= KeyModifiers::SHIFT;
            KeyCode::Char(c.to_ascii_lowercase())
        }
        KeyCode::BackTab => {
            modifiers -= KeyModifiers::SHIFT;
            KeyCode::BackTab
        }
        other => other,
    };
    KeyChord { code, modifiers }
}

impl FromStr for KeyChord {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("组合键为空".to_string());
        }

        // 允许 `ctrl++` 表示加号
        let (modifier_part, key_part) = match trimmed.strip_suffix("++") {
            Some(prefix) => (Some(prefix), "+"),
            None => match trimmed.rsplit_once('+') {
                Some((prefix, key)) => (Some(prefix), key),
                None => (None, trimmed),
            },
        };

        let mut modifiers = KeyModifiers::NONE;
        for modifier in modifier_part.into_iter().flat_map(|p| p.split('+')) {
            modifiers |= match modifier.trim().to_ascii_lowercase().as_str() {
                "ctrl" | "control" | "c" => KeyModifiers::CONTROL,
                "alt" | "meta" | "m" => KeyModifiers::ALT,
                "shift" | "s" => KeyModifiers::SHIFT,
                other => return Err(format!("未知的修饰键: {}", other)),
            };
        }

        let key_part = key_part.trim();
        let code = match key_part.to_ascii_lowercase().as_str() {
            "" => return Err(format!("缺少按键: {}", raw)),
            "enter" | "return" => KeyCode::Enter,
            "tab" => KeyCode::Tab,
            "backtab" => KeyCode::BackTab,
            "esc" | "escape" => KeyCode::Esc,
            "backspace" => KeyCode::Backspace,
            "space" => KeyCode::Char(' '),
            "up" => KeyCode::Up,
            "down" => KeyCode::Down,
            "left" => KeyCode::Left,
            "right" => KeyCode::Right,
            "home" => KeyCode::Home,
            "end" => KeyCode::End,
            "pageup" => KeyCode::PageUp,
            "pagedown" => KeyCode::PageDown,
            "insert" => KeyCode::Insert,
            "delete" | "del" => KeyCode::Delete,
            lower => {
                if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    KeyCode::F(n)
                } else {
                    let mut chars = key_part.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => KeyCode::Char(c),
                        _ => return Err(format!("无法识别的按键: {}", key_part)),
                    }
                }
            }
        };

        Ok(KeyChord::new(code, modifiers))
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.contains(KeyModifiers::CONTROL) {
            f.write_str("ctrl+")?;
        }
        if self.modifiers.contains(KeyModifiers::ALT) {
            f.write_str("alt+")?;
        }
        if self.modifiers.contains(KeyModifiers::SHIFT) {
            f.write_str("shift+")?;
        }
        match self.code {
            KeyCode::Char(' ') => f.write_str("space"),
            KeyCode::Char(c) => write!(f, "{}", c),
            KeyCode::F(n) => write!(f, "f{}", n),
            other => write!(f, "{:?}", other),
        }
    }
}

/// 保留给界面的按键集合，这些按键永远不会转发给会话
#[derive(Debug, Clone, Default)]
pub struct ReservedKeys {
    chords: Vec<KeyChord>,
}

impl ReservedKeys {
    pub fn new(chords: Vec<KeyChord>) -> Self {
        Self { chords }
    }

    /// 无法解析的配置项会被跳过并记录警告
    pub fn from_config(config: &KeyConfig) -> Self {
        let chords = std::iter::once(&config.command_prefix)
            .chain(config.panel_switch.iter())
            .filter_map(|raw| match raw.parse::<KeyChord>() {
                Ok(chord) => Some(chord),
                Err(e) => {
                    warn!("忽略无效的保留按键 {:?}: {}", raw, e);
                    None
                }
            })
            .collect();
        Self { chords }
    }

    pub fn is_reserved(&self, event: &KeyEvent) -> bool {
        self.chords.iter().any(|chord| chord.matches(event))
    }

    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }
}

/// 把按键编码为终端输入字节，无法表示的按键返回 None
pub fn encode_key(event: &KeyEvent) -> Option<Vec<u8>> {
    if event.kind == KeyEventKind::Release {
        return None;
    }

    let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
    let alt = event.modifiers.contains(KeyModifiers::ALT);

    let mut bytes = Vec::new();
    if alt {
        bytes.push(0x1b);
    }

    match event.code {
        KeyCode::Char(c) if ctrl => bytes.push(control_byte(c)?),
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
        KeyCode::Enter => bytes.push(b'\r'),
        KeyCode::Tab => bytes.push(b'\t'),
        KeyCode::BackTab => bytes.extend_from_slice(b"\x1b[Z"),
        KeyCode::Backspace => bytes.push(if ctrl { 0x08 } else { 0x7f }),
        KeyCode::Esc => bytes.push(0x1b),
        KeyCode::Up => bytes.extend_from_slice(b"\x1b[A"),
        KeyCode::Down => bytes.extend_from_slice(b"\x1b[B"),
        KeyCode::Right => bytes.extend_from_slice(b"\x1b[C"),
        KeyCode::Left => bytes.extend_from_slice(b"\x1b[D"),
        KeyCode::Home => bytes.extend_from_slice(b"\x1b[H"),
        KeyCode::End => bytes.extend_from_slice(b"\x1b[F"),
        KeyCode::PageUp => bytes.extend_from_slice(b"\x1b[5~"),
        KeyCode::PageDown => bytes.extend_from_slice(b"\x1b[6~"),
        KeyCode::Insert => bytes.extend_from_slice(b"\x1b[2~"),
        KeyCode::Delete => bytes.extend_from_slice(b"\x1b[3~"),
        KeyCode::F(n) => {
            let seq: &[u8] = match n {
                1 => b"\x1bOP",
                2 => b"\x1bOQ",
                3 => b"\x1bOR",
                4 => b"\x1bOS",
                5 => b"\x1b[15~",
                6 => b"\x1b[17~",
                7 => b"\x1b[18~",
                8 => b"\x1b[19~",
                9 => b"\x1b[20~",
                10 => b"\x1b[21~",
                11 => b"\x1b[23~",
                12 => b"\x1b[24~",
                _ => return None,
            };
            bytes.extend_from_slice(seq);
        }
        _ => return None,
    }

    Some(bytes)
}

fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '/' | '7' => Some(0x1f),
        '?' | '8' => Some(0x7f),
        _ => None,
    }
}
