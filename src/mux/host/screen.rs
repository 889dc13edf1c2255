//! 进程内会话的终端屏幕
//!
//! PTY 输出交给 vt100 解析器，光标移动、清屏和备用屏幕都按终端语义处理，
//! 抓取结果与 tmux `capture-pane` 的纯文本形式一致。

use vt100::Parser;

use crate::mux::types::{ScreenCapture, TerminalSize};

pub struct TerminalScreen {
    parser: Parser,
}

impl TerminalScreen {
    pub fn new(size: TerminalSize, scrollback: usize) -> Self {
        let (rows, cols) = dimensions(size);
        Self {
            parser: Parser::new(rows, cols, scrollback),
        }
    }

    /// 输入原始字节，拆开的 UTF-8 和控制序列由解析器跨调用保留
    pub fn process(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.parser.process(bytes);
    }

    pub fn resize(&mut self, size: TerminalSize) {
        let (rows, cols) = dimensions(size);
        self.parser.screen_mut().set_size(rows, cols);
    }

    pub fn capture(&mut self) -> ScreenCapture {
        let history = self.scrollback_rows();
        let screen = self.parser.screen();
        let (_, cols) = screen.size();
        let mut lines: Vec<String> = screen
            .rows(0, cols)
            .map(|row| row.trim_end().to_string())
            .collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        ScreenCapture {
            line_count: history + lines.len(),
            lines,
        }
    }

    /// 当前保存的回滚行数
    fn scrollback_rows(&mut self) -> usize {
        let screen = self.parser.screen_mut();
        let offset = screen.scrollback();
        screen.set_scrollback(usize::MAX);
        let rows = screen.scrollback();
        screen.set_scrollback(offset);
        rows
    }
}

fn dimensions(size: TerminalSize) -> (u16, u16) {
    (size.rows.max(1), size.cols.max(1))
}
