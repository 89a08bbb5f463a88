use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use quota_match::{BatchReport, LineOutcome, LineReport};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Summary,
    Lines,
    Views,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Summary => Page::Lines,
            Page::Lines => Page::Views,
            Page::Views => Page::Summary,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Summary => Page::Views,
            Page::Lines => Page::Summary,
            Page::Views => Page::Lines,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Summary => "Summary",
            Page::Lines => "Payroll Lines",
            Page::Views => "Views",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeFilter {
    All,
    Decided,
    Undecided,
    NoMatch,
    ZeroRate,
    Failed,
}

impl OutcomeFilter {
    pub fn accepts(&self, outcome: &LineOutcome) -> bool {
        match self {
            OutcomeFilter::All => true,
            OutcomeFilter::Decided => matches!(outcome, LineOutcome::Decided { .. }),
            OutcomeFilter::Undecided => matches!(outcome, LineOutcome::Undecided { .. }),
            OutcomeFilter::NoMatch => matches!(outcome, LineOutcome::NoMatch { .. }),
            OutcomeFilter::ZeroRate => matches!(outcome, LineOutcome::SkippedZeroRate),
            OutcomeFilter::Failed => matches!(outcome, LineOutcome::Failed { .. }),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeFilter::All => "ALL",
            OutcomeFilter::Decided => "DECIDED",
            OutcomeFilter::Undecided => "UNDECIDED",
            OutcomeFilter::NoMatch => "NO MATCH",
            OutcomeFilter::ZeroRate => "ZERO RATE",
            OutcomeFilter::Failed => "FAILED",
        }
    }
}

pub struct App {
    pub title: String,
    pub report: BatchReport,
    /// Indices into report.lines passing the active filter
    pub visible: Vec<usize>,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    pub active_filter: OutcomeFilter,
}

impl App {
    pub fn new(title: String, report: BatchReport) -> Self {
        let mut app = Self {
            title,
            visible: Vec::new(),
            report,
            state: TableState::default(),
            current_page: Page::Lines,
            show_detail: false,
            active_filter: OutcomeFilter::All,
        };
        app.apply_filter(OutcomeFilter::All);
        app
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_line(&self) -> Option<&LineReport> {
        self.state
            .selected()
            .and_then(|i| self.visible.get(i))
            .and_then(|&idx| self.report.lines.get(idx))
    }

    pub fn apply_filter(&mut self, filter: OutcomeFilter) {
        self.active_filter = filter;
        self.visible = self
            .report
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| filter.accepts(&line.outcome))
            .map(|(idx, _)| idx)
            .collect();

        if self.visible.is_empty() {
            self.state.select(None);
        } else {
            self.state.select(Some(0));
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map_or(0, |i| (i + 20).min(len - 1));
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let i = self.state.selected().map_or(0, |i| i.saturating_sub(20));
        self.state.select(Some(i));
    }

    pub fn select_last(&mut self) {
        if !self.visible.is_empty() {
            self.state.select(Some(self.visible.len() - 1));
        }
    }
}

fn outcome_color(outcome: &LineOutcome) -> Color {
    match outcome {
        LineOutcome::Decided { .. } => Color::Green,
        LineOutcome::Undecided { .. } => Color::Yellow,
        LineOutcome::NoMatch { .. } => Color::DarkGray,
        LineOutcome::SkippedZeroRate => Color::Cyan,
        LineOutcome::Failed { .. } => Color::Red,
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('c') => {
                    app.apply_filter(OutcomeFilter::All);
                    app.current_page = Page::Lines;
                }
                KeyCode::Char(digit @ '1'..='6') if app.current_page == Page::Views => {
                    let filter = match digit {
                        '1' => OutcomeFilter::All,
                        '2' => OutcomeFilter::Decided,
                        '3' => OutcomeFilter::Undecided,
                        '4' => OutcomeFilter::NoMatch,
                        '5' => OutcomeFilter::ZeroRate,
                        _ => OutcomeFilter::Failed,
                    };
                    app.apply_filter(filter);
                    app.current_page = Page::Lines;
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.state.select(Some(0)),
                KeyCode::End => app.select_last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail && app.current_page == Page::Lines {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);

        render_lines(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        match app.current_page {
            Page::Summary => render_summary(f, chunks[1], app),
            Page::Lines => render_lines(f, chunks[1], app),
            Page::Views => render_views(f, chunks[1]),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Summary, Page::Lines, Page::Views];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    let counts = &app.report.counts;
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(app.title.clone(), Style::default().fg(Color::White)));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(format!("✓ {}", counts.success), Style::default().fg(Color::Green)));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(format!("– {}", counts.skipped), Style::default().fg(Color::Cyan)));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(format!("✗ {}", counts.errors), Style::default().fg(Color::Red)));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_lines(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["#", "File", "Sheet", "Employee", "Rate", "S1", "S2", "Outcome"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows: Vec<Row> = app
        .visible
        .iter()
        .filter_map(|&idx| app.report.lines.get(idx))
        .map(|line| {
            let color = outcome_color(&line.outcome);
            let (s1, s2) = line
                .outcome
                .filter()
                .map(|o| (o.stage1_count.to_string(), o.stage2_count.to_string()))
                .unwrap_or_else(|| ("-".to_string(), "-".to_string()));

            Row::new(vec![
                Cell::from(line.ordinal.to_string()),
                Cell::from(truncate(&line.file_name, 14)),
                Cell::from(truncate(&line.sheet_name, 10)),
                Cell::from(truncate(&line.employee, 10)),
                Cell::from(format!("{}", line.quoted_rate)),
                Cell::from(s1),
                Cell::from(s2),
                Cell::from(truncate(&line.outcome.describe(), 30)).style(Style::default().fg(color)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(15),
            Constraint::Length(11),
            Constraint::Length(11),
            Constraint::Length(7),
            Constraint::Length(4),
            Constraint::Length(4),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Payroll Lines "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_summary(f: &mut Frame, area: Rect, app: &App) {
    let report = &app.report;
    let label = |text: &str| {
        Span::styled(
            format!("  {}", text),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )
    };

    let content = vec![
        Line::from(""),
        Line::from(vec![label("Run: "), Span::raw(report.run_id.clone())]),
        Line::from(vec![label("Started: "), Span::raw(report.started_at.to_rfc3339())]),
        Line::from(vec![label("Quota rows: "), Span::raw(report.snapshot_size.to_string())]),
        Line::from(""),
        Line::from(vec![label("总处理记录数: "), Span::raw(report.counts.processed.to_string())]),
        Line::from(vec![
            label("成功匹配数: "),
            Span::styled(report.counts.success.to_string(), Style::default().fg(Color::Green)),
        ]),
        Line::from(vec![
            label("跳过数: "),
            Span::styled(report.counts.skipped.to_string(), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            label("错误数: "),
            Span::styled(report.counts.errors.to_string(), Style::default().fg(Color::Red)),
        ]),
    ];

    let paragraph = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Summary "),
    );

    f.render_widget(paragraph, area);
}

fn render_views(f: &mut Frame, area: Rect) {
    let entries = [
        ("1", "All lines"),
        ("2", "Decided"),
        ("3", "Undecided (NoDecision)"),
        ("4", "No match"),
        ("5", "Zero rate (skipped)"),
        ("6", "Failed"),
    ];

    let mut content = vec![Line::from("")];
    for (key, name) in entries {
        content.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(format!("[{}]", key), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
            Span::raw(format!(" {}", name)),
        ]));
    }

    let paragraph = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Views - Filter by Outcome "),
    );

    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, app.visible.len()),
        Style::default().fg(Color::Cyan),
    )];

    if app.active_filter != OutcomeFilter::All {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("Filter: {}", app.active_filter.label()),
            Style::default().fg(Color::Green),
        ));
        status_spans.push(Span::raw(" ("));
        status_spans.push(Span::styled("c", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" clear)"));
    }

    for (key, action, color) in [
        ("Enter", " Candidates | ", Color::Yellow),
        ("Tab", " Page | ", Color::Yellow),
        ("↑/↓", " Nav | ", Color::Yellow),
        ("q", " Quit", Color::Red),
    ] {
        status_spans.push(Span::styled(key, Style::default().fg(color)));
        status_spans.push(Span::raw(action));
    }

    let status_bar = Paragraph::new(vec![Line::from(status_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::White)));

    f.render_widget(status_bar, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Matching Quotas ");

    let Some(line) = app.selected_line() else {
        f.render_widget(Paragraph::new("No line selected").block(block), area);
        return;
    };

    let key = |text: &str| Span::styled(format!("  {}", text), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));

    let mut content = vec![
        Line::from(""),
        Line::from(vec![key("文件名: "), Span::raw(line.file_name.clone())]),
        Line::from(vec![key("工作表名: "), Span::raw(line.sheet_name.clone())]),
        Line::from(vec![key("职员: "), Span::raw(line.employee.clone())]),
        Line::from(vec![key("定额: "), Span::raw(line.quoted_rate.to_string())]),
        Line::from(""),
        Line::from(vec![Span::styled(
            format!("  {}", line.outcome.describe()),
            Style::default().fg(outcome_color(&line.outcome)),
        )]),
    ];

    if let Some(filter) = line.outcome.filter() {
        content.push(Line::from(""));
        content.push(Line::from(vec![
            key("effected_from: "),
            Span::raw(filter.version.clone().unwrap_or_else(|| "-".to_string())),
        ]));
        content.push(Line::from(vec![
            key("条件1 / 条件1+2: "),
            Span::raw(format!("{} / {}", filter.stage1_count, filter.stage2_count)),
        ]));
        content.push(Line::from("  ─────────────────────────────────────"));

        for entry in &filter.candidates {
            content.push(Line::from(format!(
                "  {} | {} | {} | {} | {} ",
                entry.primary_category, entry.secondary_category, entry.process, entry.model, entry.rate
            )));
        }
    }

    content.push(Line::from(""));
    content.push(Line::from(Span::styled(
        "  Press Enter to close",
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )));

    f.render_widget(Paragraph::new(content).block(block), area);
}

/// Truncate on character boundaries (names are mostly CJK)
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_match::{BatchCounts, FilterOutcome};

    fn line(ordinal: usize, outcome: LineOutcome) -> LineReport {
        LineReport {
            ordinal,
            file_name: "202005.xls".to_string(),
            sheet_name: "绕嵌排".to_string(),
            employee: format!("职员{}", ordinal),
            quoted_rate: 4.0,
            outcome,
        }
    }

    fn report() -> BatchReport {
        let empty = FilterOutcome {
            version: Some("20200401".to_string()),
            stage1_count: 0,
            stage2_count: 0,
            candidates: Vec::new(),
        };

        BatchReport {
            run_id: "run".to_string(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            snapshot_size: 0,
            limit: None,
            limit_reached: false,
            counts: BatchCounts::default(),
            lines: vec![
                line(1, LineOutcome::SkippedZeroRate),
                line(2, LineOutcome::NoMatch { filter: empty }),
                line(3, LineOutcome::Failed { error: "bad".to_string() }),
            ],
        }
    }

    #[test]
    fn test_filter_and_navigation() {
        let mut app = App::new("202005".to_string(), report());
        assert_eq!(app.visible, vec![0, 1, 2]);

        app.previous();
        assert_eq!(app.selected_line().unwrap().ordinal, 3);
        app.next();
        assert_eq!(app.selected_line().unwrap().ordinal, 1);

        app.apply_filter(OutcomeFilter::Failed);
        assert_eq!(app.visible, vec![2]);
        assert_eq!(app.selected_line().unwrap().ordinal, 3);

        app.apply_filter(OutcomeFilter::Decided);
        assert!(app.selected_line().is_none());
    }

    #[test]
    fn test_truncate_cjk() {
        assert_eq!(truncate("绕嵌排", 10), "绕嵌排");
        assert_eq!(truncate("一二三四五六", 4), "一二三…");
    }
}
