//! Version- and locale-aware resolution of translation components.
//!
//! A client that knows a translation key renders it itself. For older clients
//! the server substitutes the arguments into the locale's format string and
//! sends plain text instead.

use tracing::{debug, warn};

use super::component::{ChatComponent, Content, TranslationArg};
use super::locale::LocaleTable;

/// The receiving connection, as far as masking cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskContext<'a> {
    pub protocol_version: i32,
    pub locale: &'a str,
}

/// Build a translation component, warning when `key` is not in `locales`
pub fn from_key(locales: &LocaleTable, key: &str, with: Vec<TranslationArg>) -> ChatComponent {
    if !locales.contains(key) {
        warn!(key, "Translation key missing from locale table");
    }
    ChatComponent::translate(key, with)
}

/// Resolve `component` (and its children) for the receiving connection
///
/// Without a connection context, or for a key the table does not know, a
/// translation becomes a text component holding the raw key. Other content
/// kinds pass through untouched.
pub fn mask(locales: &LocaleTable, component: &ChatComponent, ctx: Option<&MaskContext<'_>>) -> ChatComponent {
    let content = match &component.content {
        Content::Translate { translate, with } => mask_translation(locales, translate, with, ctx),
        other => other.clone(),
    };

    ChatComponent {
        content,
        style: component.style.clone(),
        extra: component
            .extra
            .iter()
            .map(|child| mask(locales, child, ctx))
            .collect(),
    }
}

fn mask_translation(
    locales: &LocaleTable,
    key: &str,
    with: &[TranslationArg],
    ctx: Option<&MaskContext<'_>>,
) -> Content {
    let raw_key = || Content::Text {
        text: key.to_string(),
    };

    let (Some(ctx), Some(entry)) = (ctx, locales.get(key)) else {
        debug!(key, "Degrading translation to raw key");
        return raw_key();
    };

    let with: Vec<TranslationArg> = with
        .iter()
        .map(|arg| match arg {
            TranslationArg::Component(inner) => {
                TranslationArg::Component(Box::new(mask(locales, inner, Some(ctx))))
            }
            other => other.clone(),
        })
        .collect();

    if entry.supports(ctx.protocol_version) {
        return Content::Translate {
            translate: key.to_string(),
            with,
        };
    }

    match entry.translation(ctx.locale) {
        Some(format) => Content::Text {
            text: format_translation(format, &with),
        },
        None => {
            debug!(key, locale = ctx.locale, "No translation for locale");
            raw_key()
        }
    }
}

/// Arguments of one kind, tracking which were already substituted
struct ArgPool {
    values: Vec<String>,
    used: Vec<bool>,
}

impl ArgPool {
    fn new(values: Vec<String>) -> Self {
        let used = vec![false; values.len()];
        Self { values, used }
    }

    fn next(&mut self) -> String {
        match self.used.iter().position(|used| !used) {
            Some(index) => {
                self.used[index] = true;
                self.values[index].clone()
            }
            None => String::new(),
        }
    }

    /// 1-indexed
    fn nth(&mut self, n: usize) -> String {
        match n.checked_sub(1).filter(|index| *index < self.values.len()) {
            Some(index) => {
                self.used[index] = true;
                self.values[index].clone()
            }
            None => String::new(),
        }
    }
}

/// Substitute `args` into a format string.
///
/// `%s` and `%d` take the next unused string or number argument, `%n$s` and
/// `%n$d` take the n-th argument of that kind, `%%` is a literal percent sign.
/// Placeholders without an argument become empty; unrecognised `%` sequences
/// are copied through.
pub fn format_translation(format: &str, args: &[TranslationArg]) -> String {
    let (numbers, strings): (Vec<&TranslationArg>, Vec<&TranslationArg>) =
        args.iter().partition(|arg| arg.is_number());
    let mut strings = ArgPool::new(strings.iter().map(|arg| arg.render()).collect());
    let mut numbers = ArgPool::new(numbers.iter().map(|arg| arg.render()).collect());

    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        let consumed = if tail.starts_with('%') {
            out.push('%');
            1
        } else if tail.starts_with('s') {
            out.push_str(&strings.next());
            1
        } else if tail.starts_with('d') {
            out.push_str(&numbers.next());
            1
        } else {
            let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
            let index = tail[..digits].parse::<usize>().unwrap_or(0);
            match tail.get(digits..digits + 2) {
                Some("$s") if digits > 0 => {
                    out.push_str(&strings.nth(index));
                    digits + 2
                }
                Some("$d") if digits > 0 => {
                    out.push_str(&numbers.nth(index));
                    digits + 2
                }
                _ => {
                    out.push('%');
                    0
                }
            }
        };
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}
