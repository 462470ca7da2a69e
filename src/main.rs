use anyhow::{Context, Result};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, MouseEventKind},
    execute, queue,
    style::{self, Color as CColor},
    terminal,
};
use directories::ProjectDirs;
use rand::Rng;
use rodio::{OutputStream, OutputStreamHandle, Sink, buffer::SamplesBuffer};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write, stdout};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// ── Playfield constants ─────────────────────────────────────────────────────

// Everything simulates in a fixed 360x640 logical space; the renderer scales
// to whatever the terminal gives us.
const BOARD_W: f64 = 360.0;
const BOARD_H: f64 = 640.0;

const BIRD_W: f64 = 34.0;
const BIRD_H: f64 = 24.0;
const BIRD_X: f64 = BOARD_W / 8.0;

const PIPE_W: f64 = 64.0;
const PIPE_H: f64 = 512.0;
const OPENING_SPACE: f64 = BOARD_H / 4.0;

const GRAVITY: f64 = 0.1; // per frame, not per ms
const JUMP_VY: f64 = -3.0;
const BASE_VX: f64 = -1.0;
const WIND_VX: f64 = -1.8;
const STRONG_WIND_VX: f64 = -2.3;

const PIPE_INTERVAL_MS: f64 = 1800.0;
const WEATHER_INTERVAL: Duration = Duration::from_millis(4000);

// Elapsed ms divided by this expresses motion in "frames" at the intended
// cadence, so speed holds steady across refresh rates.
const REF_FRAME_MS: f64 = 8.0;

// ── Sounds ──────────────────────────────────────────────────────────────────

// Game-over cue: a sawtooth sliding 400Hz -> 80Hz while fading out.
fn game_over_samples() -> Vec<f32> {
    use fundsp::prelude::*;

    let freq = envelope(|t: f32| lerp(400.0, 80.0, (t / 0.4).min(1.0)));
    let gain = envelope(|t: f32| lerp(0.15, 0.0, (t / 0.5).min(1.0)));
    let mut unit = (freq >> saw()) * gain;
    unit.set_sample_rate(44_100.0);

    (0..22_050).map(|_| unit.get_mono()).collect()
}

fn play_game_over(audio: Option<&OutputStreamHandle>) {
    let Some(handle) = audio else { return };
    let Ok(sink) = Sink::try_new(handle) else { return };
    sink.append(SamplesBuffer::new(1, 44_100, game_over_samples()));
    sink.detach(); // play in background
}

// ── Colors ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
struct Rgb(u8, u8, u8);

impl Rgb {
    const fn lerp(a: Rgb, b: Rgb, t_256: u16) -> Rgb {
        let t = t_256 as i32;
        Rgb(
            (a.0 as i32 + (b.0 as i32 - a.0 as i32) * t / 256) as u8,
            (a.1 as i32 + (b.1 as i32 - a.1 as i32) * t / 256) as u8,
            (a.2 as i32 + (b.2 as i32 - a.2 as i32) * t / 256) as u8,
        )
    }
}

const SKY_TOP: Rgb = Rgb(70, 180, 200);
const SKY_BOT: Rgb = Rgb(190, 232, 245);
const PIPE_L: Rgb = Rgb(74, 122, 26);
const PIPE_M: Rgb = Rgb(100, 170, 40);
const PIPE_R: Rgb = Rgb(115, 191, 46);
const PIPE_HI: Rgb = Rgb(145, 215, 62);
const CAP_DARK: Rgb = Rgb(60, 100, 20);
const BIRD_Y: Rgb = Rgb(245, 200, 66);
const BIRD_HI: Rgb = Rgb(255, 225, 100);
const BIRD_WING: Rgb = Rgb(215, 165, 35);
const BIRD_EYE: Rgb = Rgb(255, 255, 255);
const BIRD_PUPIL: Rgb = Rgb(20, 20, 20);
const BIRD_BEAK: Rgb = Rgb(225, 75, 35);
const PANEL: Rgb = Rgb(210, 185, 110);
const PANEL_LIGHT: Rgb = Rgb(220, 195, 120);
const RAIN_TINT: Rgb = Rgb(0, 0, 255);
const SNOW_TINT: Rgb = Rgb(255, 255, 255);
const WHITE: Rgb = Rgb(255, 255, 255);
const SHADOW: Rgb = Rgb(30, 30, 30);

// ── Pixel buffer with half-block rendering ──────────────────────────────────

struct PixelBuf {
    w: usize,
    h: usize, // pixel height = terminal rows * 2
    px: Vec<Rgb>,
}

impl PixelBuf {
    fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            px: vec![SKY_TOP; w * h],
        }
    }

    fn resize(&mut self, w: usize, h: usize) {
        self.w = w;
        self.h = h;
        self.px.resize(w * h, SKY_TOP);
    }

    fn set(&mut self, x: i32, y: i32, c: Rgb) {
        if x >= 0 && y >= 0 && (x as usize) < self.w && (y as usize) < self.h {
            self.px[y as usize * self.w + x as usize] = c;
        }
    }

    fn get(&self, x: usize, y: usize) -> Rgb {
        self.px[y * self.w + x]
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, c: Rgb) {
        for dy in 0..h {
            for dx in 0..w {
                self.set(x + dx, y + dy, c);
            }
        }
    }

    fn render(&self, out: &mut impl Write) -> io::Result<()> {
        queue!(out, cursor::MoveTo(0, 0))?;
        let rows = self.h / 2;
        let mut prev_fg = Rgb(0, 0, 0);
        let mut prev_bg = Rgb(0, 0, 0);
        let mut need_fg = true;
        let mut need_bg = true;

        for row in 0..rows {
            for col in 0..self.w {
                let top = self.get(col, row * 2);
                let bot = self.get(col, row * 2 + 1);

                if top == bot {
                    if need_bg || prev_bg != top {
                        queue!(
                            out,
                            style::SetBackgroundColor(CColor::Rgb {
                                r: top.0,
                                g: top.1,
                                b: top.2
                            })
                        )?;
                        prev_bg = top;
                        need_bg = false;
                    }
                    queue!(out, style::Print(' '))?;
                } else {
                    if need_fg || prev_fg != top {
                        queue!(
                            out,
                            style::SetForegroundColor(CColor::Rgb {
                                r: top.0,
                                g: top.1,
                                b: top.2
                            })
                        )?;
                        prev_fg = top;
                        need_fg = false;
                    }
                    if need_bg || prev_bg != bot {
                        queue!(
                            out,
                            style::SetBackgroundColor(CColor::Rgb {
                                r: bot.0,
                                g: bot.1,
                                b: bot.2
                            })
                        )?;
                        prev_bg = bot;
                        need_bg = false;
                    }
                    queue!(out, style::Print('\u{2580}'))?; // ▀
                }
            }
            if row < rows - 1 {
                queue!(out, style::ResetColor, style::Print("\r\n"))?;
                need_fg = true;
                need_bg = true;
            }
        }
        queue!(out, style::ResetColor)?;
        out.flush()
    }
}

// ── 3x5 bitmap digits ──────────────────────────────────────────────────────

#[rustfmt::skip]
const DIGITS: [[u8; 15]; 10] = [
    [1,1,1, 1,0,1, 1,0,1, 1,0,1, 1,1,1], // 0
    [0,1,0, 1,1,0, 0,1,0, 0,1,0, 1,1,1], // 1
    [1,1,1, 0,0,1, 1,1,1, 1,0,0, 1,1,1], // 2
    [1,1,1, 0,0,1, 0,1,1, 0,0,1, 1,1,1], // 3
    [1,0,1, 1,0,1, 1,1,1, 0,0,1, 0,0,1], // 4
    [1,1,1, 1,0,0, 1,1,1, 0,0,1, 1,1,1], // 5
    [1,1,1, 1,0,0, 1,1,1, 1,0,1, 1,1,1], // 6
    [1,1,1, 0,0,1, 0,1,0, 0,1,0, 0,1,0], // 7
    [1,1,1, 1,0,1, 1,1,1, 1,0,1, 1,1,1], // 8
    [1,1,1, 1,0,1, 1,1,1, 0,0,1, 1,1,1], // 9
];

fn draw_digit(buf: &mut PixelBuf, x: i32, y: i32, d: u8, fg: Rgb) {
    let glyph = &DIGITS[d as usize];
    for row in 0..5 {
        for col in 0..3 {
            if glyph[row * 3 + col] == 1 {
                let px = x + col as i32;
                let py = y + row as i32;
                buf.set(px + 1, py + 1, SHADOW);
                buf.set(px, py, fg);
            }
        }
    }
}

fn draw_number(buf: &mut PixelBuf, x: i32, y: i32, n: u32, fg: Rgb) {
    for (i, ch) in n.to_string().chars().enumerate() {
        let d = ch as u8 - b'0';
        draw_digit(buf, x + i as i32 * 4, y, d, fg);
    }
}

fn number_width(n: u32) -> i32 {
    n.to_string().len() as i32 * 4 - 1 // 3px per digit + 1px spacing
}

// ── Weather ─────────────────────────────────────────────────────────────────

// Re-rolled on a fixed wall-clock timer that runs in every phase, title
// screen and game-over included.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Weather {
    Clear,
    Rain,
    Snow,
    Wind,
    StrongWind,
}

impl Weather {
    const ALL: [Weather; 5] = [
        Weather::Clear,
        Weather::Rain,
        Weather::Snow,
        Weather::Wind,
        Weather::StrongWind,
    ];

    fn pick(rng: &mut impl Rng) -> Weather {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }
}

// ── Game ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
struct Rect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Rect {
    fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum PipeKind {
    Upper,
    Lower,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Pipe {
    x: f64,
    y: f64,
    kind: PipeKind,
    passed: bool,
}

impl Pipe {
    fn rect(&self) -> Rect {
        Rect {
            x: self.x,
            y: self.y,
            w: PIPE_W,
            h: PIPE_H,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Ready,
    Playing,
    GameOver,
}

// Normalized input. Jump class is space, up arrow, `x` or any mouse button;
// while Ready any press at all starts the round.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Press {
    Jump,
    Other,
}

// What the frame step owes the outside world afterwards.
#[derive(Clone, Copy, Debug, Default)]
struct FrameEvents {
    game_over_cue: bool,
    new_best: bool,
}

struct Game {
    phase: Phase,
    bird_y: f64,
    bird_vy: f64,
    // Front is always the leftmost pair; recycling only ever pops the front.
    pipes: VecDeque<Pipe>,
    score: f64,
    best: f64,
    weather: Weather,
    world_vx: f64,
    last_pipe_ms: f64,
    last_frame_ms: f64,
    frames: u64,
    cue_played: bool,
}

impl Game {
    fn new(best: f64) -> Self {
        Game {
            phase: Phase::Ready,
            bird_y: BOARD_H / 2.0,
            bird_vy: 0.0,
            pipes: VecDeque::new(),
            score: 0.0,
            best,
            weather: Weather::Clear,
            world_vx: BASE_VX,
            last_pipe_ms: 0.0,
            last_frame_ms: 0.0,
            frames: 0,
            cue_played: false,
        }
    }

    fn bird_rect(&self) -> Rect {
        Rect {
            x: BIRD_X,
            y: self.bird_y,
            w: BIRD_W,
            h: BIRD_H,
        }
    }

    fn display_score(&self) -> u32 {
        self.score.floor() as u32
    }

    fn display_best(&self) -> u32 {
        self.best.floor() as u32
    }

    fn set_weather(&mut self, rng: &mut impl Rng) {
        self.weather = Weather::pick(rng);
    }

    // Rain and snow are visual only: they leave whatever the last wind set.
    fn apply_weather(&mut self) {
        match self.weather {
            Weather::Clear => self.world_vx = BASE_VX,
            Weather::Rain | Weather::Snow => {}
            Weather::Wind => self.world_vx = WIND_VX,
            Weather::StrongWind => self.world_vx = STRONG_WIND_VX,
        }
    }

    fn start_round(&mut self, now_ms: f64) {
        self.bird_y = BOARD_H / 2.0;
        self.bird_vy = 0.0;
        self.score = 0.0;
        self.pipes.clear();
        self.cue_played = false;
        self.last_pipe_ms = now_ms - PIPE_INTERVAL_MS - 1.0; // first pair due now
        self.last_frame_ms = now_ms;
        self.phase = Phase::Playing;
    }

    fn press(&mut self, press: Press, now_ms: f64) {
        match self.phase {
            Phase::Ready => self.start_round(now_ms),
            Phase::Playing if press == Press::Jump => self.bird_vy = JUMP_VY,
            Phase::GameOver if press == Press::Jump => {
                // Reset first; the same press then doubles as the opening jump.
                self.start_round(now_ms);
                self.bird_vy = JUMP_VY;
            }
            _ => {}
        }
    }

    fn spawn_pair(&mut self, rng: &mut impl Rng) {
        let upper_y = -PIPE_H / 4.0 - rng.random_range(0.0..PIPE_H / 2.0);
        self.pipes.push_back(Pipe {
            x: BOARD_W,
            y: upper_y,
            kind: PipeKind::Upper,
            passed: false,
        });
        self.pipes.push_back(Pipe {
            x: BOARD_W,
            y: upper_y + PIPE_H + OPENING_SPACE,
            kind: PipeKind::Lower,
            passed: false,
        });
    }

    fn frame(&mut self, now_ms: f64, rng: &mut impl Rng) -> FrameEvents {
        let mut events = FrameEvents::default();
        self.frames += 1;

        match self.phase {
            Phase::Ready => return events,
            Phase::GameOver => {
                if !self.cue_played {
                    self.cue_played = true;
                    events.game_over_cue = true;
                }
                return events;
            }
            Phase::Playing => {}
        }

        let dt = now_ms - self.last_frame_ms;
        self.last_frame_ms = now_ms;
        let step = dt / REF_FRAME_MS;

        self.apply_weather();

        // Gravity accumulates once per frame; position scales with elapsed
        // time. The bird can never rise past the top edge.
        self.bird_vy += GRAVITY;
        self.bird_y = (self.bird_y + self.bird_vy * step).max(0.0);
        if self.bird_y > BOARD_H {
            self.phase = Phase::GameOver;
        }

        // One pair per interval, unless this frame already ended the round.
        if self.phase == Phase::Playing && now_ms - self.last_pipe_ms > PIPE_INTERVAL_MS {
            self.spawn_pair(rng);
            self.last_pipe_ms = now_ms;
        }

        let bird = self.bird_rect();
        for pipe in &mut self.pipes {
            pipe.x += self.world_vx * step;

            if !pipe.passed && bird.x > pipe.x + PIPE_W {
                pipe.passed = true;
                self.score += 0.5; // half per pipe, one full point per pair
            }

            if bird.overlaps(&pipe.rect()) {
                self.phase = Phase::GameOver;
            }
        }

        // All pipes share one velocity, so the front stays the leftmost.
        while self.pipes.front().is_some_and(|p| p.x + PIPE_W < 0.0) {
            self.pipes.pop_front();
        }

        if self.score > self.best {
            self.best = self.score;
            events.new_best = true;
        }

        events
    }
}

// ── High score storage ──────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScoreFile {
    high_score: f64,
}

struct ScoreStore {
    path: PathBuf,
}

impl ScoreStore {
    fn open() -> Result<Self> {
        let proj = ProjectDirs::from("com", "gapwing", "Gapwing")
            .context("could not resolve project directories")?;
        let dir = proj.data_local_dir().to_path_buf();
        fs::create_dir_all(&dir).ok();
        Ok(Self {
            path: dir.join("highscore.json"),
        })
    }

    #[cfg(test)]
    fn at(path: PathBuf) -> Self {
        Self { path }
    }

    // Missing or unreadable files fall back to 0.
    fn load(&self) -> f64 {
        if let Ok(s) = fs::read_to_string(&self.path) {
            if let Ok(v) = serde_json::from_str::<ScoreFile>(&s) {
                return v.high_score;
            }
        }
        0.0
    }

    fn save(&self, high_score: f64) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&ScoreFile { high_score })?;
        fs::write(&tmp, data)?;
        atomic_rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn atomic_rename(from: &Path, to: &Path) -> Result<()> {
    // Best-effort atomic replace on the same filesystem.
    if to.exists() {
        let _ = fs::remove_file(to);
    }
    fs::rename(from, to)?;
    Ok(())
}

// ── Rendering ───────────────────────────────────────────────────────────────

struct Viewport {
    sx: f64,
    sy: f64,
}

impl Viewport {
    fn of(buf: &PixelBuf) -> Self {
        Self {
            sx: buf.w as f64 / BOARD_W,
            sy: buf.h as f64 / BOARD_H,
        }
    }

    fn rect(&self, r: &Rect) -> (i32, i32, i32, i32) {
        let x0 = (r.x * self.sx).round() as i32;
        let y0 = (r.y * self.sy).round() as i32;
        let x1 = ((r.x + r.w) * self.sx).round() as i32;
        let y1 = ((r.y + r.h) * self.sy).round() as i32;
        (x0, y0, x1 - x0, y1 - y0)
    }
}

impl Game {
    fn draw(&self, buf: &mut PixelBuf) {
        let vp = Viewport::of(buf);

        draw_sky(buf);
        draw_weather_tint(buf, self.weather);
        for pipe in &self.pipes {
            draw_pipe(buf, &vp, pipe);
        }
        self.draw_bird(buf, &vp);

        draw_number(buf, 2, 2, self.display_score(), WHITE);
        draw_number(buf, 2, 9, self.display_best(), BIRD_Y);

        match self.phase {
            Phase::Ready => draw_title(buf),
            Phase::GameOver => self.draw_game_over(buf),
            Phase::Playing => {}
        }
    }

    fn draw_bird(&self, buf: &mut PixelBuf, vp: &Viewport) {
        let (x, y, w, h) = vp.rect(&self.bird_rect());
        let w = w.max(3);
        let h = h.max(2);
        let tilt = (self.bird_vy / 3.0).clamp(-1.0, 1.0) as i32;

        // Body with a lighter crown
        buf.fill_rect(x, y, w, h, BIRD_Y);
        buf.fill_rect(x + 1, y, w - 2, (h / 4).max(1), BIRD_HI);

        // Wing flaps on a fixed cadence
        let wing_y = y + h / 2 + if self.frames % 8 < 4 { -1 } else { 1 } + tilt;
        buf.fill_rect(x + 1, wing_y, (w / 3).max(1), (h / 3).max(1), BIRD_WING);

        // Eye
        let ex = x + w - (w / 4).max(1) - 1;
        let ey = y + (h / 4).max(1);
        buf.fill_rect(ex, ey, 2, 2, BIRD_EYE);
        buf.set(ex + 1, ey + 1, BIRD_PUPIL);

        // Beak and tail follow the tilt
        let beak_y = y + h / 2 - 1 + tilt;
        buf.fill_rect(x + w, beak_y, (w / 3).max(2), (h / 3).max(1), BIRD_BEAK);
        buf.fill_rect(x - (w / 4).max(1), beak_y, (w / 4).max(1), 2, BIRD_WING);
    }

    fn draw_game_over(&self, buf: &mut PixelBuf) {
        // Dim the scene, then a panel with score over best.
        for y in 0..buf.h {
            for x in 0..buf.w {
                let c = buf.get(x, y);
                buf.set(x as i32, y as i32, Rgb(c.0 / 2, c.1 / 2, c.2 / 2));
            }
        }

        let cx = buf.w as i32 / 2;
        let cy = buf.h as i32 / 2;
        let panel_w = (buf.w as i32 / 3).max(24);
        let panel_h = (buf.h as i32 / 5).max(16);
        let px = cx - panel_w / 2;
        let py = cy - panel_h / 2;
        buf.fill_rect(px - 1, py - 1, panel_w + 2, panel_h + 2, SHADOW);
        buf.fill_rect(px, py, panel_w, panel_h, PANEL);
        buf.fill_rect(px + 1, py + 1, panel_w - 2, panel_h - 2, PANEL_LIGHT);

        let score = self.display_score();
        let best = self.display_best();
        draw_number(buf, cx - number_width(score) / 2, py + 3, score, WHITE);
        draw_number(buf, cx - number_width(best) / 2, py + 10, best, BIRD_Y);
    }
}

fn draw_sky(buf: &mut PixelBuf) {
    for y in 0..buf.h {
        let t = (y as u32 * 256 / buf.h.max(1) as u32) as u16;
        let c = Rgb::lerp(SKY_TOP, SKY_BOT, t);
        for x in 0..buf.w {
            buf.set(x as i32, y as i32, c);
        }
    }
}

fn draw_weather_tint(buf: &mut PixelBuf, weather: Weather) {
    let tint = match weather {
        Weather::Rain => RAIN_TINT,
        Weather::Snow => SNOW_TINT,
        _ => return,
    };
    // ~20% overlay, same alpha the canvas original used
    for y in 0..buf.h {
        for x in 0..buf.w {
            let c = buf.get(x, y);
            buf.set(x as i32, y as i32, Rgb::lerp(c, tint, 51));
        }
    }
}

fn draw_pipe(buf: &mut PixelBuf, vp: &Viewport, pipe: &Pipe) {
    let (x, y, w, h) = vp.rect(&pipe.rect());
    for dx in 0..w {
        let c = pipe_shade(dx, w);
        for dy in 0..h {
            buf.set(x + dx, y + dy, c);
        }
    }

    // Lip on the gap-facing end, one pixel proud of the body
    let cap_h = (buf.h as i32 / 48).max(2);
    let (cap_top, cap_bot) = match pipe.kind {
        PipeKind::Upper => (y + h - cap_h, y + h),
        PipeKind::Lower => (y, y + cap_h),
    };
    for dx in -1..=w {
        let c = pipe_shade(dx + 1, w + 2);
        for yy in cap_top..cap_bot {
            buf.set(x + dx, yy, c);
        }
        buf.set(x + dx, cap_top, CAP_DARK);
        buf.set(x + dx, cap_bot - 1, CAP_DARK);
    }
}

fn pipe_shade(x: i32, total_w: i32) -> Rgb {
    if total_w <= 1 {
        return PIPE_M;
    }
    let t = (x as f64 / (total_w - 1) as f64 * 256.0) as u16;
    if t < 64 {
        Rgb::lerp(PIPE_L, PIPE_M, (t * 4).min(256))
    } else if t < 100 {
        Rgb::lerp(PIPE_M, PIPE_HI, ((t - 64) * 7).min(256))
    } else if t < 160 {
        Rgb::lerp(PIPE_HI, PIPE_R, ((t - 100) * 4).min(256))
    } else {
        Rgb::lerp(PIPE_R, PIPE_L, ((t - 160) * 3).min(256))
    }
}

fn draw_title(buf: &mut PixelBuf) {
    let cx = buf.w as i32 / 2;
    let cy = buf.h as i32 / 4;
    let char_w = (buf.w as i32 / 24).clamp(3, 8);
    let char_h = char_w * 3 / 2;
    let text = "GAPWING";
    let sx = cx - text.len() as i32 * char_w / 2;

    for i in 0..text.len() as i32 {
        let bx = sx + i * char_w;
        buf.fill_rect(bx, cy, char_w - 1, char_h, BIRD_Y);
        buf.fill_rect(bx, cy, char_w - 1, 1, BIRD_HI);
    }

    // Subtitle blocks standing in for "press any key"
    let msg = "PRESS ANY KEY";
    let msg_x = cx - msg.len() as i32 * 2;
    let sub_y = cy + char_h + 4;
    for (i, ch) in msg.chars().enumerate() {
        if ch == ' ' {
            continue;
        }
        buf.fill_rect(msg_x + i as i32 * 4, sub_y, 3, 3, WHITE);
    }
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let store = ScoreStore::open()?;
    let mut game = Game::new(store.load());
    let mut rng = rand::rng();

    // Audio is best-effort; no output device just means a silent game.
    let audio = OutputStream::try_default().ok();
    let audio_handle = audio.as_ref().map(|(_, handle)| handle.clone());

    terminal::enable_raw_mode()?;
    let mut out = stdout();
    execute!(
        out,
        terminal::EnterAlternateScreen,
        cursor::Hide,
        terminal::DisableLineWrap,
        event::EnableMouseCapture,
    )?;

    let cleanup = |out: &mut io::Stdout| -> io::Result<()> {
        execute!(
            out,
            event::DisableMouseCapture,
            terminal::LeaveAlternateScreen,
            cursor::Show,
            terminal::EnableLineWrap,
        )?;
        terminal::disable_raw_mode()
    };

    let (cols, rows) = terminal::size()?;
    let mut buf = PixelBuf::new(cols as usize, rows as usize * 2);

    let start = Instant::now();
    let mut next_weather = start + WEATHER_INTERVAL;
    let frame_dur = Duration::from_millis(33); // ~30 fps

    loop {
        let frame_start = Instant::now();
        let now_ms = start.elapsed().as_secs_f64() * 1000.0;

        // Input
        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        cleanup(&mut out)?;
                        return Ok(());
                    }
                    KeyCode::Char(' ') | KeyCode::Up | KeyCode::Char('x') => {
                        game.press(Press::Jump, now_ms);
                    }
                    _ => game.press(Press::Other, now_ms),
                },
                Event::Mouse(m) => {
                    if let MouseEventKind::Down(_) = m.kind {
                        game.press(Press::Jump, now_ms);
                    }
                }
                Event::Resize(c, r) => {
                    buf.resize(c as usize, r as usize * 2);
                }
                _ => {}
            }
        }

        // Weather runs on its own clock, in every phase
        if frame_start >= next_weather {
            game.set_weather(&mut rng);
            next_weather = advance_deadline(next_weather, frame_start, WEATHER_INTERVAL);
        }

        // Simulate
        let events = game.frame(now_ms, &mut rng);
        if events.game_over_cue {
            play_game_over(audio_handle.as_ref());
        }
        if events.new_best {
            // a failed write never stops play
            let _ = store.save(game.best);
        }

        // Render
        game.draw(&mut buf);
        buf.render(&mut out)?;

        // Frame pacing
        let elapsed = frame_start.elapsed();
        if elapsed < frame_dur {
            std::thread::sleep(frame_dur - elapsed);
        }
    }
}

// A stall longer than the interval skips the missed deadlines instead of
// replaying them, so one roll covers the whole gap.
fn advance_deadline(next: Instant, now: Instant, interval: Duration) -> Instant {
    let mut next = next;
    while next <= now {
        next += interval;
    }
    next
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn rng() -> Pcg32 {
        Pcg32::seed_from_u64(0x5EED)
    }

    // A game already past the title screen, spawn timer quiet.
    fn started(now_ms: f64) -> Game {
        let mut g = Game::new(0.0);
        g.press(Press::Other, now_ms);
        g.last_pipe_ms = now_ms;
        g
    }

    #[test]
    fn any_press_starts_from_the_title_screen() {
        let mut g = Game::new(0.0);
        assert_eq!(g.phase, Phase::Ready);
        g.press(Press::Other, 5.0);
        assert_eq!(g.phase, Phase::Playing);
        assert_eq!(g.bird_y, BOARD_H / 2.0);
        assert_eq!(g.bird_vy, 0.0); // activation itself is not a jump
    }

    #[test]
    fn bird_clamps_at_the_top_edge() {
        let mut rng = rng();
        let mut g = started(0.0);
        for i in 1..200 {
            let now = i as f64 * 16.0;
            g.press(Press::Jump, now);
            g.frame(now, &mut rng);
            assert!(g.bird_y >= 0.0);
        }
    }

    #[test]
    fn gravity_accumulates_per_frame_not_per_ms() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.frame(0.0, &mut rng);
        assert_eq!(g.bird_vy, GRAVITY);
        // a frame 100ms long still adds exactly one gravity step
        g.frame(100.0, &mut rng);
        assert_eq!(g.bird_vy, 2.0 * GRAVITY);
    }

    #[test]
    fn falling_past_the_bottom_ends_the_round() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.bird_y = BOARD_H + 1.0;
        g.frame(8.0, &mut rng);
        assert_eq!(g.phase, Phase::GameOver);
    }

    #[test]
    fn opening_space_is_fixed_for_every_draw() {
        let mut rng = rng();
        let mut g = Game::new(0.0);
        for _ in 0..1000 {
            g.pipes.clear();
            g.spawn_pair(&mut rng);
            let upper = g.pipes[0];
            let lower = g.pipes[1];
            assert_eq!(upper.kind, PipeKind::Upper);
            assert_eq!(lower.kind, PipeKind::Lower);
            assert_eq!(upper.x, lower.x);
            assert_eq!(lower.y - (upper.y + PIPE_H), OPENING_SPACE);
            assert!(upper.y <= -PIPE_H / 4.0);
            assert!(upper.y > -PIPE_H / 4.0 - PIPE_H / 2.0);
        }
    }

    #[test]
    fn one_pair_spawns_per_interval() {
        let mut rng = rng();
        let mut g = Game::new(0.0);
        g.press(Press::Other, 0.0); // activation makes the first pair due now
        g.frame(1.0, &mut rng);
        assert_eq!(g.pipes.len(), 2);
        g.frame(1000.0, &mut rng);
        assert_eq!(g.pipes.len(), 2); // interval not yet elapsed
        g.frame(1.0 + PIPE_INTERVAL_MS + 1.0, &mut rng);
        assert_eq!(g.pipes.len(), 4);
    }

    #[test]
    fn score_awards_half_per_pipe_and_floors_display() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.pipes.push_back(Pipe {
            x: BIRD_X - PIPE_W - 1.0,
            y: 0.0,
            kind: PipeKind::Upper,
            passed: false,
        });
        g.frame(0.0, &mut rng);
        assert_eq!(g.score, 0.5);
        assert_eq!(g.display_score(), 0);

        g.pipes.push_back(Pipe {
            x: BIRD_X - PIPE_W - 1.0,
            y: 600.0,
            kind: PipeKind::Lower,
            passed: false,
        });
        g.frame(0.0, &mut rng);
        assert_eq!(g.score, 1.0);
        assert_eq!(g.display_score(), 1);

        // a passed pipe never scores twice
        g.frame(0.0, &mut rng);
        assert_eq!(g.score, 1.0);
    }

    #[test]
    fn aabb_overlap_cases() {
        let bird = Rect {
            x: 10.0,
            y: 10.0,
            w: 34.0,
            h: 24.0,
        };
        let hit = Rect {
            x: 20.0,
            y: 0.0,
            w: 64.0,
            h: 30.0,
        };
        let miss = Rect {
            x: 50.0,
            y: 0.0,
            w: 64.0,
            h: 30.0,
        };
        assert!(bird.overlaps(&hit));
        assert!(!bird.overlaps(&miss)); // no x overlap
    }

    #[test]
    fn touching_a_pipe_ends_the_round() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.pipes.push_back(Pipe {
            x: BIRD_X,
            y: g.bird_y,
            kind: PipeKind::Lower,
            passed: true,
        });
        g.frame(0.0, &mut rng);
        assert_eq!(g.phase, Phase::GameOver);
    }

    #[test]
    fn recycle_removes_only_the_fully_offscreen_front() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.pipes.push_back(Pipe {
            x: -65.0,
            y: 0.0,
            kind: PipeKind::Upper,
            passed: true,
        });
        g.pipes.push_back(Pipe {
            x: -63.0,
            y: 0.0,
            kind: PipeKind::Lower,
            passed: true,
        });
        g.frame(0.0, &mut rng); // zero elapsed, so advance moves nothing
        assert_eq!(g.pipes.len(), 1);
        assert_eq!(g.pipes[0].x, -63.0);
    }

    #[test]
    fn round_ending_frame_completes_without_spawning() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.last_pipe_ms = -(PIPE_INTERVAL_MS + 1.0); // a pair is overdue
        g.bird_y = BOARD_H + 1.0;
        g.pipes.push_back(Pipe {
            x: BIRD_X - PIPE_W - 1.0,
            y: 0.0,
            kind: PipeKind::Upper,
            passed: false,
        });

        g.frame(8.0, &mut rng);
        assert_eq!(g.phase, Phase::GameOver);
        // the pipe still advanced and scored on the way out
        assert_eq!(g.pipes[0].x, BIRD_X - PIPE_W - 2.0);
        assert_eq!(g.score, 0.5);
        // but no new pair arrives once the round is over
        assert_eq!(g.pipes.len(), 1);
    }

    #[test]
    fn game_over_cue_fires_once_until_restart() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.bird_y = BOARD_H + 1.0;
        g.frame(8.0, &mut rng);
        assert_eq!(g.phase, Phase::GameOver);

        assert!(g.frame(16.0, &mut rng).game_over_cue);
        assert!(!g.frame(24.0, &mut rng).game_over_cue);

        // restart clears the latch, so the next round can fire it again
        g.press(Press::Jump, 32.0);
        g.bird_y = BOARD_H + 1.0;
        g.frame(40.0, &mut rng);
        assert!(g.frame(48.0, &mut rng).game_over_cue);
    }

    #[test]
    fn restart_resets_everything_then_jumps() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.score = 3.5;
        g.bird_y = BOARD_H + 1.0;
        g.frame(8.0, &mut rng);
        g.frame(16.0, &mut rng); // latch the cue
        assert_eq!(g.phase, Phase::GameOver);

        // non-jump input does not restart
        g.press(Press::Other, 20.0);
        assert_eq!(g.phase, Phase::GameOver);

        g.press(Press::Jump, 32.0);
        assert_eq!(g.phase, Phase::Playing);
        assert_eq!(g.score, 0.0);
        assert_eq!(g.bird_y, BOARD_H / 2.0);
        assert_eq!(g.bird_vy, JUMP_VY);
        assert!(g.pipes.is_empty());
        assert!(!g.cue_played);

        // a second jump right after is a plain jump, not another reset
        g.bird_vy = 0.0;
        g.press(Press::Jump, 33.0);
        assert_eq!(g.bird_vy, JUMP_VY);
        assert_eq!(g.score, 0.0);
        assert_eq!(g.phase, Phase::Playing);
    }

    #[test]
    fn best_score_never_decreases() {
        let mut rng = rng();
        let mut g = started(0.0);
        g.best = 2.0;
        g.score = 1.5;
        assert!(!g.frame(0.0, &mut rng).new_best);
        assert_eq!(g.best, 2.0);

        g.score = 2.5;
        assert!(g.frame(0.0, &mut rng).new_best);
        assert_eq!(g.best, 2.5);

        // restart does not touch the best
        g.bird_y = BOARD_H + 1.0;
        g.frame(8.0, &mut rng);
        g.press(Press::Jump, 16.0);
        assert_eq!(g.best, 2.5);
    }

    #[test]
    fn score_store_round_trip() {
        let path = std::env::temp_dir().join(format!("gapwing-test-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let store = ScoreStore::at(path.clone());
        assert_eq!(store.load(), 0.0);
        store.save(12.5).unwrap();
        assert_eq!(store.load(), 12.5);
        store.save(30.0).unwrap();
        assert_eq!(store.load(), 30.0);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rain_and_snow_keep_the_current_wind() {
        let mut g = Game::new(0.0);
        g.weather = Weather::Wind;
        g.apply_weather();
        assert_eq!(g.world_vx, WIND_VX);

        g.weather = Weather::Rain;
        g.apply_weather();
        assert_eq!(g.world_vx, WIND_VX);

        g.weather = Weather::Snow;
        g.apply_weather();
        assert_eq!(g.world_vx, WIND_VX);

        g.weather = Weather::StrongWind;
        g.apply_weather();
        assert_eq!(g.world_vx, STRONG_WIND_VX);

        g.weather = Weather::Clear;
        g.apply_weather();
        assert_eq!(g.world_vx, BASE_VX);
    }

    #[test]
    fn weather_draws_are_roughly_uniform() {
        let mut rng = rng();
        let mut counts = [0u32; 5];
        for _ in 0..5000 {
            let w = Weather::pick(&mut rng);
            let i = Weather::ALL.iter().position(|&x| x == w).unwrap();
            counts[i] += 1;
        }
        for &c in &counts {
            assert!((800..1200).contains(&c), "weather counts skewed: {counts:?}");
        }
    }

    #[test]
    fn stalled_weather_deadline_catches_up_in_one_step() {
        let start = Instant::now();
        let next = start + WEATHER_INTERVAL;
        let later = start + WEATHER_INTERVAL * 7 + Duration::from_millis(5);
        let caught_up = advance_deadline(next, later, WEATHER_INTERVAL);
        assert!(caught_up > later);
        assert!(caught_up - later <= WEATHER_INTERVAL);
    }

    #[test]
    fn pipes_stay_sorted_by_x() {
        let mut rng = rng();
        let mut g = Game::new(0.0);
        g.press(Press::Other, 0.0);
        let mut now = 0.0;
        for _ in 0..400 {
            now += 33.0;
            g.frame(now, &mut rng);
            let xs: Vec<f64> = g.pipes.iter().map(|p| p.x).collect();
            for w in xs.windows(2) {
                assert!(w[0] <= w[1] + f64::EPSILON);
            }
            if g.phase == Phase::GameOver {
                g.press(Press::Jump, now);
            }
        }
    }
}
