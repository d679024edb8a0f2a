use ratatui::Frame;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Widget, Wrap,
};

use crate::app::{App, InputMode};
use crate::emulator::Vt100Emulator;
use crate::model::{TerminalSize, Theme};
use crate::session::SessionState;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

struct Palette {
    bg: Color,
    panel: Color,
    text: Color,
    accent: Color,
    muted: Color,
    warn: Color,
    error: Color,
    segment_a: Color,
    segment_b: Color,
    highlight: Color,
}

const DARK: Palette = Palette {
    bg: Color::Rgb(9, 15, 25),
    panel: Color::Rgb(16, 27, 44),
    text: Color::Rgb(226, 232, 240),
    accent: Color::Rgb(52, 211, 153),
    muted: Color::Rgb(140, 156, 178),
    warn: Color::Rgb(251, 191, 36),
    error: Color::Rgb(248, 113, 113),
    segment_a: Color::Rgb(17, 94, 89),
    segment_b: Color::Rgb(30, 64, 175),
    highlight: Color::Rgb(24, 36, 58),
};

const LIGHT: Palette = Palette {
    bg: Color::Rgb(248, 250, 252),
    panel: Color::Rgb(255, 255, 255),
    text: Color::Rgb(15, 23, 42),
    accent: Color::Rgb(5, 150, 105),
    muted: Color::Rgb(100, 116, 139),
    warn: Color::Rgb(180, 83, 9),
    error: Color::Rgb(185, 28, 28),
    segment_a: Color::Rgb(153, 246, 228),
    segment_b: Color::Rgb(191, 219, 254),
    highlight: Color::Rgb(226, 232, 240),
};

fn palette(theme: Theme) -> &'static Palette {
    match theme {
        Theme::Dark => &DARK,
        Theme::Light => &LIGHT,
    }
}

pub fn render(frame: &mut Frame, app: &App, emulator: Option<&Vt100Emulator>) {
    let colors = palette(app.theme());
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(Block::default().style(Style::default().bg(colors.bg)), frame.area());
    render_header(frame, root[0], app, colors);
    render_body(frame, root[1], app, emulator, colors);
    render_footer(frame, root[2], app, colors);

    if app.session().loading {
        render_loading(frame, root[1], app, colors);
    }
    if app.session().banner.is_some() {
        render_banner(frame, root[1], app, colors);
    }
    if app.show_help() {
        render_help_modal(frame, app, colors);
    }
}

/// Grid size of the shell viewport for a terminal of `width` x `height`.
pub fn terminal_size(width: u16, height: u16) -> TerminalSize {
    TerminalSize::new(width.saturating_sub(2), height.saturating_sub(4))
}

fn render_header(frame: &mut Frame, area: Rect, app: &App, colors: &Palette) {
    let workload = app.workload();
    let container = app
        .selected_container()
        .map(|info| info.name.as_str())
        .unwrap_or("-");
    let state = app.session().state;

    let mut spans = Vec::new();
    push_segment(&mut spans, " podterm ", colors.bg, colors.accent, colors.segment_a);
    push_segment(
        &mut spans,
        format!(" {} ", workload.cluster),
        colors.text,
        colors.segment_a,
        colors.segment_b,
    );
    push_segment(
        &mut spans,
        format!(" {}:{} {} ", workload.qualified_name(), container, app.selected_shell()),
        colors.text,
        colors.segment_b,
        colors.bg,
    );
    spans.push(Span::styled(
        format!(" {} ", state.label()),
        Style::default()
            .fg(state_color(state, colors))
            .add_modifier(Modifier::BOLD),
    ));

    let right = format!("{}  {} ", compact_text(app.server(), 40), app.theme().label());
    let right_width = right.chars().count() as u16;
    if right_width + spans_width(&spans) as u16 >= area.width {
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(colors.bg)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(colors.bg)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right).style(Style::default().bg(colors.bg).fg(colors.muted)),
        chunks[1],
    );
}

fn render_body(
    frame: &mut Frame,
    area: Rect,
    app: &App,
    emulator: Option<&Vt100Emulator>,
    colors: &Palette,
) {
    let Some(emulator) = emulator else {
        render_container_table(frame, area, app, colors);
        return;
    };

    let connected = app.session().state == SessionState::Connected;
    let (shell_area, picker_area) = if connected || app.containers().is_empty() {
        (area, None)
    } else {
        let picker_height = (app.containers().len() as u16 + 3).min(area.height / 2);
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(picker_height)])
            .split(area);
        (chunks[0], Some(chunks[1]))
    };

    let border = if app.mode() == InputMode::Terminal {
        colors.accent
    } else {
        colors.muted
    };
    let block = Block::default()
        .title(format!(" {} ", app.workload().name))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(colors.panel));
    let inner = block.inner(shell_area);
    frame.render_widget(block, shell_area);
    frame.render_widget(
        ScreenView {
            screen: emulator.screen(),
            colors: palette(emulator.theme()),
            show_cursor: connected && emulator.focused(),
        },
        inner,
    );

    if let Some(picker_area) = picker_area {
        render_container_table(frame, picker_area, app, colors);
    }
}

struct ScreenView<'a> {
    screen: &'a vt100::Screen,
    colors: &'static Palette,
    show_cursor: bool,
}

impl Widget for ScreenView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (rows, cols) = self.screen.size();
        for row in 0..rows.min(area.height) {
            for col in 0..cols.min(area.width) {
                let Some(cell) = self.screen.cell(row, col) else {
                    continue;
                };
                if cell.is_wide_continuation() {
                    continue;
                }

                let mut style = Style::default()
                    .fg(terminal_color(cell.fgcolor(), self.colors.text))
                    .bg(terminal_color(cell.bgcolor(), self.colors.panel));
                if cell.bold() {
                    style = style.add_modifier(Modifier::BOLD);
                }
                if cell.italic() {
                    style = style.add_modifier(Modifier::ITALIC);
                }
                if cell.underline() {
                    style = style.add_modifier(Modifier::UNDERLINED);
                }
                if cell.inverse() {
                    style = style.add_modifier(Modifier::REVERSED);
                }

                let contents = cell.contents();
                let symbol = if contents.is_empty() {
                    " ".to_string()
                } else {
                    contents.to_string()
                };
                if let Some(target) = buf.cell_mut((area.x + col, area.y + row)) {
                    target.set_symbol(&symbol).set_style(style);
                }
            }
        }

        if self.show_cursor && !self.screen.hide_cursor() {
            let (row, col) = self.screen.cursor_position();
            if row < area.height
                && col < area.width
                && let Some(target) = buf.cell_mut((area.x + col, area.y + row))
            {
                target.set_style(Style::default().add_modifier(Modifier::REVERSED));
            }
        }
    }
}

fn terminal_color(color: vt100::Color, fallback: Color) -> Color {
    match color {
        vt100::Color::Default => fallback,
        vt100::Color::Idx(index) => Color::Indexed(index),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

fn render_container_table(frame: &mut Frame, area: Rect, app: &App, colors: &Palette) {
    let header = Row::new(
        ["NAME", "IMAGE", "READY", "STATE", "RESTARTS", "AGE"]
            .into_iter()
            .map(|title| Cell::from(title).style(Style::default().add_modifier(Modifier::BOLD))),
    )
    .style(Style::default().fg(colors.accent));

    let rows = app.containers().iter().map(|container| {
        let ready = if container.ready { "yes" } else { "no" };
        Row::new(vec![
            Cell::from(container.name.clone()),
            Cell::from(compact_text(&container.image, 40)),
            Cell::from(ready),
            Cell::from(compact_text(&container.state, 18)),
            Cell::from(container.restarts.to_string()),
            Cell::from(container.age.clone()),
        ])
        .style(Style::default().fg(colors.text))
    });

    let block = Block::default()
        .title(format!(
            " Containers of {} ({}) · Enter connect · Tab next · s shell ",
            app.workload().qualified_name(),
            app.containers().len()
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(colors.muted))
        .style(Style::default().bg(colors.panel));

    let table = Table::new(
        rows,
        [
            Constraint::Length(22),
            Constraint::Min(20),
            Constraint::Length(6),
            Constraint::Length(18),
            Constraint::Length(9),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(1)
    .row_highlight_style(
        Style::default()
            .bg(colors.highlight)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

    let mut state = TableState::default();
    state.select(app.selected_container_index());
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_loading(frame: &mut Frame, body: Rect, app: &App, colors: &Palette) {
    let session = app.session();
    let frame_symbol = SPINNER[session.spinner_frame % SPINNER.len()];
    let label = match session.state {
        SessionState::AwaitingFirstMessage => "Waiting for the shell",
        _ => "Connecting",
    };
    let text = format!(" {frame_symbol} {label}… ");
    let width = (text.chars().count() as u16 + 2).min(body.width);
    let area = Rect {
        x: body.x + body.width.saturating_sub(width) / 2,
        y: body.y + body.height / 2,
        width,
        height: 3.min(body.height),
    };
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(colors.accent).bg(colors.panel))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(colors.accent)),
            ),
        area,
    );
}

fn render_banner(frame: &mut Frame, body: Rect, app: &App, colors: &Palette) {
    let Some(banner) = app.session().banner.as_ref() else {
        return;
    };
    let lines = banner.text.lines().count() as u16;
    let height = (lines + 3).clamp(4, (body.height / 2).max(4));
    let area = Rect {
        x: body.x + 1,
        y: body.y + 1,
        width: body.width.saturating_sub(2),
        height: height.min(body.height.saturating_sub(1)),
    };

    let mut text = banner
        .text
        .lines()
        .map(|line| Line::from(line.to_string()))
        .collect::<Vec<_>>();
    text.push(Line::from(Span::styled(
        "Esc dismiss · r reconnect",
        Style::default().fg(colors.muted),
    )));

    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(text)
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(colors.text).bg(colors.panel))
            .block(
                Block::default()
                    .title(format!(" {} ", banner.title))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(colors.error)),
            ),
        area,
    );
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App, colors: &Palette) {
    let (mode_label, mode_bg) = match app.mode() {
        InputMode::Terminal => (" TERM ", colors.accent),
        InputMode::Leader => (" LEAD ", colors.warn),
        InputMode::Control => (" CTRL ", colors.segment_b),
    };
    let mut spans = Vec::new();
    push_segment(&mut spans, mode_label, colors.bg, mode_bg, colors.bg);
    spans.push(Span::styled(
        format!(" {}", compact_text(app.status(), area.width.saturating_sub(8) as usize)),
        Style::default().fg(status_color(app, colors)),
    ));

    let hint = match app.mode() {
        InputMode::Terminal => "Ctrl+] commands ",
        InputMode::Leader => "r x t c s ? q ",
        InputMode::Control => "Enter connect  r reconnect  ? help  q quit ",
    };
    let hint_width = hint.chars().count() as u16;
    if hint_width + spans_width(&spans) as u16 >= area.width {
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(colors.bg)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(hint_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(colors.bg)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(hint).style(Style::default().fg(colors.muted).bg(colors.bg)),
        chunks[1],
    );
}

fn render_help_modal(frame: &mut Frame, app: &App, colors: &Palette) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);

    let lines = vec![
        Line::from(format!(
            "podterm help  state:{}  theme:{}",
            app.session().state,
            app.theme().label()
        )),
        Line::from(""),
        Line::from("While the shell is connected every key goes to the pod."),
        Line::from("Ctrl+] then one of:"),
        Line::from("  r  reconnect with the selected container and shell"),
        Line::from("  x  close the session"),
        Line::from("  t  toggle dark/light theme"),
        Line::from("  c / C  next / previous container"),
        Line::from("  s  next shell"),
        Line::from("  e  dismiss the error banner"),
        Line::from("  ?  this help"),
        Line::from("  q  quit"),
        Line::from("  Ctrl+]  send a literal Ctrl+]"),
        Line::from(""),
        Line::from("Without a live shell the same keys work directly; Enter connects,"),
        Line::from("Tab / Shift+Tab move through containers, Esc dismisses errors."),
        Line::from(""),
        Line::from("The remote terminal keeps the size it had when the session opened."),
    ];

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(colors.accent))
                .style(Style::default().bg(colors.panel)),
        )
        .style(Style::default().fg(colors.text));

    frame.render_widget(modal, area);
}

fn state_color(state: SessionState, colors: &Palette) -> Color {
    match state {
        SessionState::Connected => colors.accent,
        SessionState::Connecting | SessionState::AwaitingFirstMessage => colors.warn,
        SessionState::Errored => colors.error,
        SessionState::Idle | SessionState::Closed => colors.muted,
    }
}

fn status_color(app: &App, colors: &Palette) -> Color {
    if app.session().banner.is_some() {
        colors.error
    } else {
        colors.text
    }
}

fn push_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars <= 1 {
        return "…".to_string();
    }
    let mut shortened = value.chars().take(max_chars - 1).collect::<String>();
    shortened.push('…');
    shortened
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
