//! Workers (registry snapshot, least loaded first)
//! Tasks (most recent task records)

use std::{
  error::Error,
  io,
  sync::{Arc, mpsc},
  thread,
  time::{Duration, Instant},
};

use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use jobd::{
  config::Config,
  database::setup_database,
  load_reader::LoadReader,
  models::{Task, WorkerNode},
  registry::{Registry, etcd::EtcdRegistry},
  scheduler::{Strategy, compare},
  store::PgTaskStore,
};
use tokio::runtime::Runtime;
use tui::{
  Terminal,
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
};

const REFRESH: Duration = Duration::from_secs(2);
const TASK_ROWS: i64 = 50;

#[derive(Clone, Copy)]
enum DashboardTab {
  Workers,
  Tasks,
}

struct App {
  current_tab: DashboardTab,
  strategy: Strategy,
  workers: Vec<WorkerNode>,
  tasks: Vec<Task>,
  status: String,
}

impl App {
  fn new(strategy: Strategy) -> Self {
    Self {
      current_tab: DashboardTab::Workers,
      strategy,
      workers: vec![],
      tasks: vec![],
      status: "connecting...".into(),
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Workers => DashboardTab::Tasks,
      DashboardTab::Tasks => DashboardTab::Workers,
    }
  }
}

struct Snapshot {
  workers: Vec<WorkerNode>,
  tasks: Vec<Task>,
  status: String,
}

struct Sources {
  store: PgTaskStore,
  reader: Option<LoadReader>,
}

async fn connect(config: &Config) -> anyhow::Result<Sources> {
  let pool = setup_database(&config.database_url).await?;
  let reader = if config.single_mode {
    None
  } else {
    let registry: Arc<dyn Registry> = Arc::new(EtcdRegistry::connect(&config.etcd_endpoints).await?);
    Some(LoadReader::new(registry, config.lease_ttl))
  };
  Ok(Sources {
    store: PgTaskStore::new(pool),
    reader,
  })
}

async fn fetch_state(sources: &Sources, strategy: Strategy) -> Snapshot {
  let mut problems = Vec::new();

  let mut workers = match &sources.reader {
    Some(reader) => reader.workers().await.unwrap_or_else(|e| {
      problems.push(format!("registry: {e}"));
      vec![]
    }),
    None => vec![],
  };
  workers.sort_by(|a, b| match (a.load(), b.load()) {
    (Some(la), Some(lb)) => compare(strategy, (a.hostname.as_str(), &la), (b.hostname.as_str(), &lb)),
    _ => a.hostname.cmp(&b.hostname),
  });

  let tasks = sources.store.list_recent(TASK_ROWS).await.unwrap_or_else(|e| {
    problems.push(format!("store: {e}"));
    vec![]
  });

  let status = if problems.is_empty() {
    format!("refreshed {}", chrono::Local::now().format("%H:%M:%S"))
  } else {
    problems.join(" | ")
  };
  Snapshot { workers, tasks, status }
}

fn main() -> Result<(), Box<dyn Error>> {
  dotenvy::dotenv().ok();
  let config = Config::from_env()?;
  let strategy = config.schedule;

  let (tx, rx) = mpsc::channel::<Snapshot>();
  thread::spawn(move || {
    let rt = match Runtime::new() {
      Ok(rt) => rt,
      Err(e) => {
        let _ = tx.send(Snapshot { workers: vec![], tasks: vec![], status: format!("runtime: {e}") });
        return;
      }
    };
    let sources = match rt.block_on(connect(&config)) {
      Ok(sources) => sources,
      Err(e) => {
        let _ = tx.send(Snapshot { workers: vec![], tasks: vec![], status: format!("connect: {e:#}") });
        return;
      }
    };
    loop {
      if tx.send(rt.block_on(fetch_state(&sources, strategy))).is_err() {
        return;
      }
      thread::sleep(REFRESH);
    }
  });

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut app = App::new(strategy);
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    if let Ok(snapshot) = rx.try_recv() {
      app.workers = snapshot.workers;
      app.tasks = snapshot.tasks;
      app.status = snapshot.status;
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate.checked_sub(last_tick.elapsed()).unwrap_or_default();
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right | KeyCode::Left | KeyCode::Tab => app.next_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
    .split(f.size());

  let tab_titles = ["Workers", "Tasks"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
  .block(Block::default().borders(Borders::ALL).title("jobd"))
  .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
  .select(match app.current_tab {
    DashboardTab::Workers => 0,
    DashboardTab::Tasks => 1,
  });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Workers => render_workers(f, app, chunks[1]),
    DashboardTab::Tasks => render_tasks(f, app, chunks[1]),
  }

  let footer = Paragraph::new(format!("←/→: Switch Tabs | q: Quit | {}", app.status))
    .style(Style::default().fg(Color::White))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_workers<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let items: Vec<ListItem> = app
    .workers
    .iter()
    .map(|w| {
      let load = match w.load() {
        Some(l) if l.is_sampled() => format!(
          "tasks {} | cpu {:.1}% | mem {:.1}% | load {:.2}",
          l.task_count, l.cpu_usage, l.memory_usage, l.load_usage
        ),
        Some(l) => format!("tasks {} | not sampled", l.task_count),
        None => "no load data".into(),
      };
      ListItem::new(vec![
        Spans::from(Span::styled(
          format!("{} ({})", w.hostname, w.id),
          Style::default().add_modifier(Modifier::BOLD),
        )),
        Spans::from(Span::raw(format!("{} | {} | last beat {}", w.address(), w.status, w.last_beat.format("%H:%M:%S")))),
        Spans::from(Span::raw(load)),
      ])
    })
    .collect();

  let title = format!("Worker Nodes (by {})", app.strategy);
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
  f.render_widget(list, area);
}

fn render_tasks<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let items: Vec<ListItem> = app
    .tasks
    .iter()
    .map(|t| {
      let kind = if t.is_big_one() { format!("singleton {}", t.big_one) } else { "long-running".into() };
      ListItem::new(Spans::from(vec![
        Span::styled(format!("{} ", t.job_id), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::raw(format!(
          "{} pid {} | {} {} | {} | beat {}",
          t.node,
          t.pid,
          t.cmd,
          t.args.join(" "),
          kind,
          t.heart_beat_time.format("%H:%M:%S")
        )),
      ]))
    })
    .collect();
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Recent Tasks"));
  f.render_widget(list, area);
}
