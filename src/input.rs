use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

const ESC: u8 = 0x1b;
const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Connect,
    Reconnect,
    CloseSession,
    ToggleTheme,
    NextContainer,
    PrevContainer,
    NextShell,
    DismissBanner,
    ToggleHelp,
    StartLeader,
    CancelLeader,
    Forward(Vec<u8>),
}

pub fn map_key(mode: InputMode, key: KeyEvent, application_cursor: bool) -> Option<Action> {
    match mode {
        InputMode::Terminal => map_terminal_key(key, application_cursor),
        InputMode::Leader => Some(map_leader_key(key)),
        InputMode::Control => map_control_key(key),
    }
}

fn is_leader(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
        && key.modifiers.contains(KeyModifiers::CONTROL)
}

fn map_terminal_key(key: KeyEvent, application_cursor: bool) -> Option<Action> {
    if is_leader(&key) {
        return Some(Action::StartLeader);
    }
    encode_key(key, application_cursor).map(Action::Forward)
}

fn map_leader_key(key: KeyEvent) -> Action {
    if is_leader(&key) {
        return Action::Forward(vec![0x1d]);
    }
    match key.code {
        KeyCode::Char('r') => Action::Reconnect,
        KeyCode::Char('x') | KeyCode::Char('d') => Action::CloseSession,
        KeyCode::Char('t') => Action::ToggleTheme,
        KeyCode::Char('c') | KeyCode::Right => Action::NextContainer,
        KeyCode::Char('C') | KeyCode::Left => Action::PrevContainer,
        KeyCode::Char('s') => Action::NextShell,
        KeyCode::Char('e') => Action::DismissBanner,
        KeyCode::Char('?') => Action::ToggleHelp,
        KeyCode::Char('q') => Action::Quit,
        _ => Action::CancelLeader,
    }
}

fn map_control_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Enter => Some(Action::Connect),
        KeyCode::Char('r') => Some(Action::Reconnect),
        KeyCode::Char('x') => Some(Action::CloseSession),
        KeyCode::Char('t') => Some(Action::ToggleTheme),
        KeyCode::Tab | KeyCode::Down | KeyCode::Char('j') => Some(Action::NextContainer),
        KeyCode::BackTab | KeyCode::Up | KeyCode::Char('k') => Some(Action::PrevContainer),
        KeyCode::Char('s') => Some(Action::NextShell),
        KeyCode::Esc | KeyCode::Char('e') => Some(Action::DismissBanner),
        KeyCode::Char('?') | KeyCode::F(1) => Some(Action::ToggleHelp),
        _ if is_leader(&key) => Some(Action::StartLeader),
        _ => None,
    }
}

/// Encodes a key press the way xterm does, so the remote shell sees the
/// same bytes a local terminal would send.
pub fn encode_key(key: KeyEvent, application_cursor: bool) -> Option<Vec<u8>> {
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let modifier = xterm_modifier(key.modifiers);

    let mut bytes = match key.code {
        KeyCode::Char(c) if ctrl => vec![control_byte(c)?],
        KeyCode::Char(c) => {
            let mut buffer = [0u8; 4];
            c.encode_utf8(&mut buffer).as_bytes().to_vec()
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace if ctrl => vec![0x08],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![ESC],
        KeyCode::Up => cursor_key(b'A', modifier, application_cursor),
        KeyCode::Down => cursor_key(b'B', modifier, application_cursor),
        KeyCode::Right => cursor_key(b'C', modifier, application_cursor),
        KeyCode::Left => cursor_key(b'D', modifier, application_cursor),
        KeyCode::Home => cursor_key(b'H', modifier, application_cursor),
        KeyCode::End => cursor_key(b'F', modifier, application_cursor),
        KeyCode::Insert => tilde_key(2, modifier),
        KeyCode::Delete => tilde_key(3, modifier),
        KeyCode::PageUp => tilde_key(5, modifier),
        KeyCode::PageDown => tilde_key(6, modifier),
        KeyCode::F(n @ 1..=4) => function_key(n, modifier),
        KeyCode::F(n) => tilde_key(function_key_code(n)?, modifier),
        _ => return None,
    };

    let is_char = matches!(key.code, KeyCode::Char(_) | KeyCode::Enter | KeyCode::Backspace);
    if alt && is_char {
        bytes.insert(0, ESC);
    }
    Some(bytes)
}

/// Bytes for pasted text. Newlines become carriage returns; the text is
/// wrapped in bracketed-paste markers when the remote asked for them.
pub fn paste_bytes(text: &str, bracketed: bool) -> Vec<u8> {
    let normalized = text.replace("\r\n", "\r").replace('\n', "\r");
    let mut bytes = Vec::with_capacity(normalized.len() + PASTE_START.len() + PASTE_END.len());
    if bracketed {
        bytes.extend_from_slice(PASTE_START);
    }
    bytes.extend_from_slice(normalized.as_bytes());
    if bracketed {
        bytes.extend_from_slice(PASTE_END);
    }
    bytes
}

fn control_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        'A'..='Z' => Some(c as u8 - b'A' + 1),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '-' => Some(0x1f),
        '?' | '8' => Some(0x7f),
        _ => None,
    }
}

fn xterm_modifier(modifiers: KeyModifiers) -> u8 {
    let mut value = 1;
    if modifiers.contains(KeyModifiers::SHIFT) {
        value += 1;
    }
    if modifiers.contains(KeyModifiers::ALT) {
        value += 2;
    }
    if modifiers.contains(KeyModifiers::CONTROL) {
        value += 4;
    }
    value
}

fn cursor_key(final_byte: u8, modifier: u8, application_cursor: bool) -> Vec<u8> {
    if modifier > 1 {
        return format!("\x1b[1;{modifier}{}", final_byte as char).into_bytes();
    }
    if application_cursor {
        vec![ESC, b'O', final_byte]
    } else {
        vec![ESC, b'[', final_byte]
    }
}

fn tilde_key(code: u8, modifier: u8) -> Vec<u8> {
    if modifier > 1 {
        format!("\x1b[{code};{modifier}~").into_bytes()
    } else {
        format!("\x1b[{code}~").into_bytes()
    }
}

fn function_key(n: u8, modifier: u8) -> Vec<u8> {
    let final_byte = b'P' + (n - 1);
    if modifier > 1 {
        format!("\x1b[1;{modifier}{}", final_byte as char).into_bytes()
    } else {
        vec![ESC, b'O', final_byte]
    }
}

fn function_key_code(n: u8) -> Option<u8> {
    match n {
        5 => Some(15),
        6 => Some(17),
        7 => Some(18),
        8 => Some(19),
        9 => Some(20),
        10 => Some(21),
        11 => Some(23),
        12 => Some(24),
        _ => None,
    }
}
