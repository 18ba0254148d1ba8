use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use super::{encode_body, PointSink, SinkError};
use crate::model::Point;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Dry-run sink writing line protocol to a shared writer, one batch at a time
#[derive(Clone)]
pub struct StdoutSink {
    out: SharedWriter,
    name: &'static str,
}

impl StdoutSink {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()), "stdout")
    }

    pub fn new(out: Box<dyn Write + Send>, name: &'static str) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            name,
        }
    }
}

impl PointSink for StdoutSink {
    fn write_points(&mut self, points: &[Point]) -> Result<(), SinkError> {
        let body = encode_body(points);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(body.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OperationFields, OperationKind, OperationTags, PipelineTags};
    use chrono::{TimeZone, Utc};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_one_line_per_point() {
        let capture = Capture::default();
        let mut sink = StdoutSink::new(Box::new(capture.clone()), "capture");
        let tags = OperationTags::new(
            &PipelineTags {
                project: "p".to_string(),
                hostname: "h".to_string(),
            },
            OperationKind::Update,
        );
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let point = Point::new(ts, tags, OperationFields::new(9));

        sink.write_points(&[point.clone(), point]).unwrap();

        let text = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "operations,hostname=h,operation=update,project=p duration_in_milliseconds=9i 1577836800000000000"
        );
        assert_eq!(sink.describe(), "capture");
    }
}
