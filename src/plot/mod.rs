//! Contour plotting through gnuplot
//!
//! Frames are plain gnuplot command scripts written to the stdin of a
//! long-lived gnuplot process. The data block lists `c g rate` rows sorted
//! by C ascending and gamma descending, with a blank line whenever C
//! changes, which is the grid layout gnuplot's contour algorithm expects.

use crate::core::{BestParam, GridError, GridPoint, RangeSpec, Result};
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Spacing between contour levels
pub const LEVEL_STEP: f64 = 0.5;

/// Where a frame is rendered
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// On-screen window
    Interactive,
    /// PNG image file
    Png(PathBuf),
}

/// Static frame decoration
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSettings {
    pub c_range: RangeSpec,
    pub g_range: RangeSpec,
    pub title: String,
}

/// Build the command script for one frame, `None` if there is no data yet
pub fn render_frame(
    db: &[(GridPoint, f64)],
    best: &BestParam,
    terminal: &Terminal,
    settings: &PlotSettings,
) -> Option<String> {
    if db.is_empty() {
        return None;
    }

    let max_rate = db
        .iter()
        .map(|&(_, rate)| rate)
        .fold(f64::NEG_INFINITY, f64::max);
    let begin_level = max_rate.round() - 3.0;
    let best_point = best.point.unwrap_or(GridPoint::new(f64::NAN, f64::NAN));

    let mut out = String::new();
    match terminal {
        Terminal::Png(path) => {
            out.push_str("set term png transparent small linewidth 2 medium enhanced\n");
            let escaped = path.display().to_string().replace('\\', "\\\\");
            let _ = writeln!(out, "set output \"{escaped}\"");
        }
        Terminal::Interactive if cfg!(windows) => out.push_str("set term windows\n"),
        Terminal::Interactive => out.push_str("set term x11\n"),
    }

    out.push_str("set xlabel \"log2(C)\"\n");
    out.push_str("set ylabel \"log2(gamma)\"\n");
    let _ = writeln!(
        out,
        "set xrange [{}:{}]",
        settings.c_range.begin, settings.c_range.end
    );
    let _ = writeln!(
        out,
        "set yrange [{}:{}]",
        settings.g_range.begin, settings.g_range.end
    );
    out.push_str("set contour\n");
    let _ = writeln!(
        out,
        "set cntrparam levels incremental {begin_level},{LEVEL_STEP},100"
    );
    out.push_str("unset surface\n");
    out.push_str("unset ztics\n");
    out.push_str("set view 0,0\n");
    let _ = writeln!(out, "set title \"{}\"", settings.title);
    out.push_str("unset label\n");
    let _ = writeln!(
        out,
        "set label \"Best log2(C) = {}  log2(gamma) = {}  accuracy = {}%\" \
         at screen 0.5,0.85 center",
        best_point.c, best_point.g, best.rate
    );
    let _ = writeln!(
        out,
        "set label \"C = {}  gamma = {}\" at screen 0.5,0.8 center",
        best_point.cost(),
        best_point.gamma()
    );
    out.push_str("set key at screen 0.9,0.9\n");
    out.push_str("splot \"-\" with lines\n");

    let mut rows = db.to_vec();
    rows.sort_by(|(a, _), (b, _)| a.c.total_cmp(&b.c).then(b.g.total_cmp(&a.g)));

    let mut prev_c = rows[0].0.c;
    for (point, rate) in &rows {
        if point.c != prev_c {
            out.push('\n');
            prev_c = point.c;
        }
        let _ = writeln!(out, "{} {} {}", point.c, point.g, rate);
    }
    out.push_str("e\n");
    // brings gnuplot back to its prompt if `set term` failed
    out.push('\n');

    Some(out)
}

/// Sends frames to a gnuplot process (or any writer)
pub struct Plotter {
    out: Box<dyn Write + Send>,
    child: Option<Child>,
    settings: PlotSettings,
}

impl Plotter {
    /// Plot into an arbitrary writer
    pub fn new(out: impl Write + Send + 'static, settings: PlotSettings) -> Self {
        Self {
            out: Box::new(out),
            child: None,
            settings,
        }
    }

    /// Start gnuplot and plot into its stdin
    pub fn spawn(gnuplot: &Path, settings: PlotSettings) -> Result<Self> {
        let mut child = Command::new(gnuplot)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| {
                GridError::PlotError(format!("cannot start {}: {e}", gnuplot.display()))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GridError::PlotError("gnuplot stdin not captured".to_string()))?;

        Ok(Self {
            out: Box::new(stdin),
            child: Some(child),
            settings,
        })
    }

    /// Draw the accumulated results on `terminal`
    pub fn redraw(
        &mut self,
        db: &[(GridPoint, f64)],
        best: &BestParam,
        terminal: &Terminal,
    ) -> Result<()> {
        let Some(frame) = render_frame(db, best, terminal, &self.settings) else {
            return Ok(());
        };
        self.out
            .write_all(frame.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|e| GridError::PlotError(e.to_string()))
    }
}

impl Drop for Plotter {
    fn drop(&mut self) {
        // Closing stdin lets gnuplot exit on its own.
        let _ = self.out.flush();
        if let Some(child) = &mut self.child {
            let _ = child.try_wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn settings() -> PlotSettings {
        PlotSettings {
            c_range: RangeSpec::new(-5.0, 15.0, 2.0),
            g_range: RangeSpec::new(3.0, -15.0, -2.0),
            title: "heart_scale".to_string(),
        }
    }

    fn best(c: f64, g: f64, rate: f64) -> BestParam {
        let mut best = BestParam::new();
        best.consider(GridPoint::new(c, g), rate);
        best
    }

    fn data_block(frame: &str) -> &str {
        let marker = "splot \"-\" with lines\n";
        let start = frame.find(marker).unwrap() + marker.len();
        &frame[start..]
    }

    #[test]
    fn test_empty_db_produces_no_frame() {
        let frame = render_frame(&[], &BestParam::new(), &Terminal::Interactive, &settings());
        assert!(frame.is_none());
    }

    #[test]
    fn test_frame_header() {
        let db = vec![(GridPoint::new(1.0, -1.0), 84.5)];
        let frame = render_frame(&db, &best(1.0, -1.0, 84.5), &Terminal::Interactive, &settings())
            .unwrap();

        assert!(frame.starts_with("set term "));
        assert!(frame.contains("set xrange [-5:15]\n"));
        assert!(frame.contains("set yrange [3:-15]\n"));
        assert!(frame.contains("set cntrparam levels incremental 82,0.5,100\n"));
        assert!(frame.contains("set title \"heart_scale\"\n"));
        assert!(frame.contains(
            "set label \"Best log2(C) = 1  log2(gamma) = -1  accuracy = 84.5%\" \
             at screen 0.5,0.85 center\n"
        ));
        assert!(frame.contains("set label \"C = 2  gamma = 0.5\" at screen 0.5,0.8 center\n"));
        assert!(frame.ends_with("e\n\n"));
    }

    #[test]
    fn test_png_frame_escapes_backslashes() {
        let db = vec![(GridPoint::new(0.0, 0.0), 50.0)];
        let frame = render_frame(
            &db,
            &best(0.0, 0.0, 50.0),
            &Terminal::Png(PathBuf::from(r"c:\out\a.png")),
            &settings(),
        )
        .unwrap();

        assert!(frame.starts_with("set term png transparent small linewidth 2 medium enhanced\n"));
        assert!(frame.contains("set output \"c:\\\\out\\\\a.png\"\n"));
    }

    #[test]
    fn test_data_sorted_and_grouped_by_c() {
        let db = vec![
            (GridPoint::new(1.0, -1.0), 3.0),
            (GridPoint::new(-1.0, -1.0), 1.0),
            (GridPoint::new(1.0, 1.0), 4.0),
            (GridPoint::new(-1.0, 1.0), 2.0),
        ];
        let frame = render_frame(&db, &best(1.0, 1.0, 4.0), &Terminal::Interactive, &settings())
            .unwrap();

        assert_eq!(
            data_block(&frame),
            "-1 1 2\n-1 -1 1\n\n1 1 4\n1 -1 3\ne\n\n"
        );
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_plotter_writes_frames() {
        let buf = SharedBuf::default();
        let mut plotter = Plotter::new(buf.clone(), settings());
        let db = vec![(GridPoint::new(0.0, 0.0), 50.0)];

        plotter.redraw(&[], &BestParam::new(), &Terminal::Interactive).unwrap();
        assert!(buf.0.lock().unwrap().is_empty());

        plotter
            .redraw(&db, &best(0.0, 0.0, 50.0), &Terminal::Png(PathBuf::from("a.png")))
            .unwrap();
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("set output \"a.png\""));
        assert!(text.contains("0 0 50\ne\n"));
    }

    #[test]
    fn test_spawn_missing_gnuplot_fails() {
        let result = Plotter::spawn(Path::new("/nonexistent/gnuplot"), settings());
        assert!(matches!(result, Err(GridError::PlotError(_))));
    }
}
