use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::{
    error::Error,
    io,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
    Frame, Terminal,
};

use earlink::sliding_window::SlidingWindow;

const SERIES_COLORS: [Color; 4] = [Color::Cyan, Color::Red, Color::Yellow, Color::Green];

/// One plotted line: a pipeline's name and its live window.
pub struct Series {
    pub name: String,
    pub window: Arc<Mutex<SlidingWindow>>,
}

struct App {
    columns: Vec<Vec<Series>>,
    snapshots: Vec<Vec<Vec<(f64, f64)>>>,
}

impl App {
    fn new(columns: Vec<Vec<Series>>) -> App {
        let snapshots = columns.iter().map(|col| vec![vec![]; col.len()]).collect();
        App { columns, snapshots }
    }

    fn on_tick(&mut self) {
        for (col, series) in self.columns.iter().enumerate() {
            for (i, s) in series.iter().enumerate() {
                self.snapshots[col][i] = s.window.lock().unwrap().snapshot();
            }
        }
    }
}

pub fn engage_gui(columns: Vec<Vec<Series>>) -> Result<(), Box<dyn Error>> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // create app and run it
    let tick_rate = Duration::from_millis(100);
    let app = App::new(columns);
    let res = run_app(&mut terminal, app, tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{:?}", err)
    }

    Ok(())
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| ui(f, &mut app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if let KeyCode::Char('q') = key.code {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let constraints: Vec<Constraint> = app
        .columns
        .iter()
        .map(|_| Constraint::Ratio(1, app.columns.len() as u32))
        .collect();
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(f.size());

    for (col, series) in app.columns.iter().enumerate() {
        let (x_bounds, y_bounds) = bounds(&app.snapshots[col]);
        let datasets = series
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Dataset::default()
                    .name(s.name.clone())
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(SERIES_COLORS[i % SERIES_COLORS.len()]))
                    .data(&app.snapshots[col][i])
            })
            .collect();

        let chart = Chart::new(datasets)
            .block(Block::default().borders(Borders::ALL).title("Signals"))
            .x_axis(
                Axis::default()
                    .title(Span::styled("packet", Style::default().fg(Color::White)))
                    .style(Style::default().fg(Color::White))
                    .bounds(x_bounds)
                    .labels(
                        [format!("{:.0}", x_bounds[0]), format!("{:.0}", x_bounds[1])]
                            .into_iter()
                            .map(Span::from)
                            .collect(),
                    ),
            )
            .y_axis(
                Axis::default()
                    .style(Style::default().fg(Color::White))
                    .bounds(y_bounds)
                    .labels(
                        [format!("{:.0}", y_bounds[0]), format!("{:.0}", y_bounds[1])]
                            .into_iter()
                            .map(Span::from)
                            .collect(),
                    ),
            );

        f.render_widget(chart, chunks[col]);
    }
}

/// Axis bounds covering every series in one column, with a little headroom
/// so lines do not hug the frame.
fn bounds(snapshots: &[Vec<(f64, f64)>]) -> ([f64; 2], [f64; 2]) {
    let mut x = [f64::MAX, f64::MIN];
    let mut y = [f64::MAX, f64::MIN];
    for series in snapshots {
        for &(px, py) in series {
            x[0] = x[0].min(px);
            x[1] = x[1].max(px);
            y[0] = y[0].min(py);
            y[1] = y[1].max(py);
        }
    }
    if x[0] > x[1] {
        return ([0.0, 1.0], [-1.0, 1.0]);
    }
    let pad = ((y[1] - y[0]) * 0.1).max(1.0);
    (x, [y[0] - pad, y[1] + pad])
}
