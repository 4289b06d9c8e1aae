use std::fmt;

/// Suavizado del EWMA sobre los intervalos entre tareas terminadas.
pub const EWMA_ALPHA: f64 = 0.1;

const MINUTE: f64 = 60.0;
const HOUR: f64 = 3_600.0;
const DAY: f64 = 86_400.0;
const WEEK: f64 = 604_800.0;

/// Tiempo restante estimado.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    /// Menos de dos tareas terminadas (o todas a la vez): sin datos.
    Unknown,
    Remaining { secs: f64 },
}

impl Eta {
    pub fn secs(&self) -> Option<f64> {
        match self {
            Eta::Unknown => None,
            Eta::Remaining { secs } => Some(*secs),
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = match self {
            Eta::Unknown => return f.write_str("unknown"),
            Eta::Remaining { secs } => *secs,
        };
        if secs >= WEEK {
            write!(f, "{:.1} weeks", secs / WEEK)
        } else if secs >= DAY {
            write!(f, "{:.1} days", secs / DAY)
        } else if secs >= HOUR {
            write!(f, "{:.1} hours", secs / HOUR)
        } else if secs >= MINUTE {
            write!(f, "{:.1} minutes", secs / MINUTE)
        } else {
            write!(f, "{:.1} seconds", secs)
        }
    }
}

/// EWMA de los intervalos entre finalizaciones, empezando en 0.
pub fn interarrival_ewma(finish_times: &[f64], alpha: f64) -> f64 {
    let mut sorted = finish_times.to_vec();
    sorted.sort_by(f64::total_cmp);

    sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(0.0, |ewma, gap| alpha * gap + (1.0 - alpha) * ewma)
}

/// Estima el tiempo restante a partir de los instantes (en segundos)
/// en que terminó cada tarea y de cuántas quedan.
pub fn estimate_remaining(finish_times: &[f64], unfinished: usize) -> Eta {
    let ewma = interarrival_ewma(finish_times, EWMA_ALPHA);
    if ewma == 0.0 {
        return Eta::Unknown;
    }
    Eta::Remaining {
        secs: ewma * unfinished as f64,
    }
}
