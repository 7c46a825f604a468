/// Whether stdout is a terminal that understands ANSI escapes, honoring
/// `NO_COLOR`/`CLICOLOR_FORCE` via `supports-color`.
pub fn stdout_supports_ansi() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}
