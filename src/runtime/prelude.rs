//! # Host prelude for the embedded-client runtime.
//!
//! `python-client` programs are written against a ready-made client handle
//! named `bot`. They still run as an ordinary child process: the launcher
//! writes this prelude, the user program and an epilogue into one file.
//!
//! ```text
//! ┌ prelude ───────────────────────────────────────────────┐
//! │ bot = Client(bot_token = os.environ.pop("BOT_TOKEN"))  │
//! │ add_footer(text), send_message routed through footer   │
//! ├ user program (verbatim) ───────────────────────────────┤
//! ├ epilogue ──────────────────────────────────────────────┤
//! │ on_message defined? register it for private chats      │
//! │ start client, print READY_MARKER, idle until signalled │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Other runtimes get their source unchanged; they read the footer from
//! `WORKER_FOOTER` themselves.

use std::borrow::Cow;

use crate::runtime::table::{Family, RuntimeKind, READY_MARKER};

const PYTHON_CLIENT_PRELUDE: &str = r#"# --- host prelude ---
import asyncio as _wv_asyncio
import os as _wv_os
import sys as _wv_sys

from pyrogram import Client, filters, idle

BOT_FOOTER = _wv_os.environ.get("WORKER_FOOTER", "")

bot = Client(
    "worker-" + _wv_os.environ.get("WORKER_ID", "anon"),
    api_id=int(_wv_os.environ.get("API_ID", "0")),
    api_hash=_wv_os.environ.get("API_HASH", ""),
    bot_token=_wv_os.environ.pop("BOT_TOKEN"),
    in_memory=True,
)


def add_footer(text):
    if not BOT_FOOTER:
        return text
    return str(text) + "\n" + BOT_FOOTER


_wv_send_message = bot.send_message


async def _wv_send_with_footer(chat_id, text, *args, **kwargs):
    return await _wv_send_message(chat_id, add_footer(text), *args, **kwargs)


bot.send_message = _wv_send_with_footer

# --- user program ---
"#;

const PYTHON_CLIENT_EPILOGUE: &str = r#"
# --- host epilogue ---
if "on_message" in globals() and callable(globals()["on_message"]):
    _wv_user_on_message = globals()["on_message"]

    @bot.on_message(filters.private)
    async def _wv_on_message(client, message):
        try:
            await _wv_user_on_message(client, message)
        except Exception as exc:
            print(f"handler error: {exc!r}", file=_wv_sys.stderr, flush=True)
            await message.reply_text(add_footer("An error occurred processing your message."))


async def _wv_main():
    await bot.start()
    print("@READY@", flush=True)
    await idle()
    await bot.stop()


_wv_asyncio.run(_wv_main())
"#;

/// Produces the file contents the launcher writes for `kind`.
pub fn render(kind: RuntimeKind, source: &str) -> Cow<'_, str> {
    if kind.spec().family != Family::Embedded {
        return Cow::Borrowed(source);
    }

    let epilogue = PYTHON_CLIENT_EPILOGUE.replace("@READY@", READY_MARKER);
    let mut out =
        String::with_capacity(PYTHON_CLIENT_PRELUDE.len() + source.len() + epilogue.len() + 1);
    out.push_str(PYTHON_CLIENT_PRELUDE);
    out.push_str(source);
    if !source.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&epilogue);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_runtimes_are_untouched() {
        let src = "echo {not a template}";
        assert!(matches!(render(RuntimeKind::Shell, src), Cow::Borrowed(s) if s == src));
    }

    #[test]
    fn embedded_source_is_spliced_verbatim_between_prelude_and_epilogue() {
        let src = "async def on_message(client, message):\n    await message.reply_text(f\"{message.text}!\")";
        let out = render(RuntimeKind::PythonClient, src);

        let user_at = out.find(src).unwrap();
        assert!(out.find("bot = Client(").unwrap() < user_at);
        assert!(out.find("@bot.on_message(filters.private)").unwrap() > user_at);
        assert!(out.contains(&format!("print(\"{READY_MARKER}\", flush=True)")));
        assert!(!out.contains("@READY@"));
    }

    #[test]
    fn credential_is_read_from_the_environment_only() {
        let out = render(RuntimeKind::PythonClient, "print('hi')");
        assert!(out.contains("os.environ.pop(\"BOT_TOKEN\")"));
    }
}
