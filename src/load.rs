use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use itertools::Itertools;
use prost::Message;

use crate::centroid::Centroid;
use crate::error::{KMeansError, Result};
use crate::point::Point;
use crate::proto::{ClusteredDataCentroids, ClusteredDataLabels, ClusteredRun, FloatList};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> KMeansError + '_ {
    move |source| KMeansError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads one vector per line. Coordinates are separated by whitespace or commas;
/// blank lines and lines starting with `#` are skipped.
fn read_vectors(path: &Path) -> Result<Vec<Vec<f32>>> {
    let reader = BufReader::new(File::open(path).map_err(io_error(path))?);

    let mut vectors: Vec<Vec<f32>> = vec![];
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error(path))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let vector = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<f32>().map_err(|_| KMeansError::Parse {
                    path: path.to_path_buf(),
                    line: index + 1,
                    token: token.to_string(),
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        if let Some(first) = vectors.first() {
            if first.len() != vector.len() {
                return Err(KMeansError::DimensionMismatch {
                    expected: first.len(),
                    found: vector.len(),
                    context: format!("{}:{}", path.display(), index + 1),
                });
            }
        }
        vectors.push(vector);
    }

    log::debug!("read {} vectors from {}", vectors.len(), path.display());
    Ok(vectors)
}

pub fn read_points(path: impl AsRef<Path>) -> Result<Vec<Point>> {
    Ok(read_vectors(path.as_ref())?.into_iter().map(Point::new).collect_vec())
}

pub fn read_centroids(path: impl AsRef<Path>) -> Result<Vec<Centroid>> {
    Ok(read_vectors(path.as_ref())?.into_iter().map(Centroid::new).collect_vec())
}

fn label_of(point: &Point) -> i32 {
    point.cluster().map_or(-1, |c| c as i32)
}

/// One line per point: its coordinates followed by its cluster index (`-1` if unassigned).
pub fn write_points(path: impl AsRef<Path>, points: &[Point]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path).map_err(io_error(path))?);
    for point in points {
        writeln!(writer, "{} {}", point.coords().iter().join(" "), label_of(point)).map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

pub fn write_centroids(path: impl AsRef<Path>, centroids: &[Centroid]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path).map_err(io_error(path))?);
    for centroid in centroids {
        writeln!(writer, "{}", centroid.coords().iter().join(" ")).map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

pub fn save_binary(path: impl AsRef<Path>, points: &[Point], centroids: &[Centroid]) -> Result<()> {
    let path = path.as_ref();
    let run = ClusteredRun {
        points: points
            .iter()
            .map(|p| FloatList { values: p.coords().to_vec() })
            .collect_vec(),
        labels: Some(ClusteredDataLabels {
            data: points.iter().map(label_of).collect_vec(),
        }),
        centroids: Some(ClusteredDataCentroids {
            data: centroids
                .iter()
                .map(|c| FloatList { values: c.coords().to_vec() })
                .collect_vec(),
        }),
    };

    let mut buf = Vec::with_capacity(run.encoded_len());
    run.encode(&mut buf)?;
    let mut file = BufWriter::new(File::create(path).map_err(io_error(path))?);
    file.write_all(&buf).map_err(io_error(path))?;
    file.flush().map_err(io_error(path))?;
    log::debug!("wrote {} bytes to {}", buf.len(), path.display());
    Ok(())
}

pub fn load_binary(path: impl AsRef<Path>) -> Result<(Vec<Point>, Vec<Centroid>)> {
    let path = path.as_ref();
    let mut buf = Vec::new();
    BufReader::new(File::open(path).map_err(io_error(path))?)
        .read_to_end(&mut buf)
        .map_err(io_error(path))?;
    let run = ClusteredRun::decode(&*buf)?;

    let labels = run.labels.map(|l| l.data).unwrap_or_default();
    let points = run
        .points
        .into_iter()
        .enumerate()
        .map(|(idx, list)| {
            let mut point = Point::new(list.values);
            if let Some(&label) = labels.get(idx) {
                if label >= 0 {
                    point.assign(label as usize);
                }
            }
            point
        })
        .collect_vec();
    let centroids = run
        .centroids
        .map(|c| c.data)
        .unwrap_or_default()
        .into_iter()
        .map(|list| Centroid::new(list.values))
        .collect_vec();

    Ok((points, centroids))
}
