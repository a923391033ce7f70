//! PLY (Polygon File Format) I/O
//!
//! ASCII PLY for point clouds and triangle meshes. The reader honours the
//! declared property order and types; the writer emits float positions and
//! normals, uchar colors and `vertex_indices` face lists.

use crate::mesh::TriangleMesh;
use crate::{Error, Result};
use arc_core::point_cloud::PointCloud;
use nalgebra::{Point3, Vector3};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScalarType {
    Int,
    Float,
}

impl ScalarType {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "char" | "uchar" | "short" | "ushort" | "int" | "uint" | "int8" | "uint8" | "int16"
            | "uint16" | "int32" | "uint32" => Ok(ScalarType::Int),
            "float" | "double" | "float32" | "float64" => Ok(ScalarType::Float),
            other => Err(Error::ParseError(format!("Unknown PLY type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
enum PropertyKind {
    Scalar(ScalarType),
    List,
}

#[derive(Debug, Clone)]
struct Property {
    name: String,
    kind: PropertyKind,
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

impl Element {
    fn position(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

enum Value {
    Scalar(f64),
    List(Vec<f64>),
}

fn next_line<R: BufRead>(lines: &mut Lines<R>, context: &str) -> Result<String> {
    lines
        .next()
        .ok_or_else(|| Error::ParseError(format!("Unexpected EOF in {}", context)))?
        .map_err(Error::from)
}

fn parse_number(token: &str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| Error::ParseError(format!("Invalid number: {}", token)))
}

fn parse_header<R: BufRead>(lines: &mut Lines<R>) -> Result<Vec<Element>> {
    if next_line(lines, "header")?.trim() != "ply" {
        return Err(Error::ParseError("Missing 'ply' magic".to_string()));
    }

    let mut elements: Vec<Element> = Vec::new();
    let mut format = None;

    loop {
        let line = next_line(lines, "header")?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", fmt, ..] => format = Some(fmt.to_string()),
            ["comment", ..] | ["obj_info", ..] | [] => {}
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .map_err(|_| Error::ParseError(format!("Invalid element count: {}", count)))?,
                properties: Vec::new(),
            }),
            ["property", "list", count_ty, item_ty, name] => {
                ScalarType::parse(count_ty)?;
                ScalarType::parse(item_ty)?;
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::ParseError("Property before element".to_string()))?;
                element.properties.push(Property {
                    name: name.to_string(),
                    kind: PropertyKind::List,
                });
            }
            ["property", ty, name] => {
                let kind = PropertyKind::Scalar(ScalarType::parse(ty)?);
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::ParseError("Property before element".to_string()))?;
                element.properties.push(Property {
                    name: name.to_string(),
                    kind,
                });
            }
            _ => return Err(Error::ParseError(format!("Invalid header line: {}", line))),
        }
    }

    match format.as_deref() {
        Some("ascii") => Ok(elements),
        Some(other) => Err(Error::UnsupportedFormat(format!(
            "PLY format '{}' not supported, only ASCII",
            other
        ))),
        None => Err(Error::ParseError("Missing format line".to_string())),
    }
}

fn parse_row(line: &str, element: &Element) -> Result<Vec<Value>> {
    let mut tokens = line.split_whitespace();
    let mut next = || {
        tokens
            .next()
            .ok_or_else(|| Error::ParseError(format!("Short row in element '{}'", element.name)))
            .and_then(parse_number)
    };

    element
        .properties
        .iter()
        .map(|p| match p.kind {
            PropertyKind::Scalar(_) => next().map(Value::Scalar),
            PropertyKind::List => {
                let count = index_value(next()?)?;
                (0..count)
                    .map(|_| next())
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)
            }
        })
        .collect()
}

fn scalar(row: &[Value], idx: usize) -> Result<f64> {
    match &row[idx] {
        Value::Scalar(v) => Ok(*v),
        Value::List(_) => Err(Error::ParseError("Expected a scalar property".to_string())),
    }
}

/// Vertex attribute columns found in a `vertex` element.
struct VertexLayout {
    position: [usize; 3],
    normal: Option<[usize; 3]>,
    color: Option<([usize; 3], f32)>,
}

impl VertexLayout {
    fn new(element: &Element) -> Result<Self> {
        let find3 = |names: [&str; 3]| -> Option<[usize; 3]> {
            Some([
                element.position(names[0])?,
                element.position(names[1])?,
                element.position(names[2])?,
            ])
        };

        let position = find3(["x", "y", "z"])
            .ok_or_else(|| Error::ParseError("Vertex element lacks x/y/z".to_string()))?;
        let normal = find3(["nx", "ny", "nz"]);
        let color = find3(["red", "green", "blue"]).map(|cols| {
            // integer colors are 0..255, float colors already 0..1
            let scale = match element.properties[cols[0]].kind {
                PropertyKind::Scalar(ScalarType::Float) => 1.0,
                _ => 1.0 / 255.0,
            };
            (cols, scale)
        });

        Ok(Self {
            position,
            normal,
            color,
        })
    }
}

/// Upper bound on rows reserved up front from a header count.
const MAX_PREALLOCATED_ROWS: usize = 1 << 20;

/// Non-negative integral value used as a count or an index.
fn index_value(value: f64) -> Result<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= usize::MAX as f64 {
        Ok(value as usize)
    } else {
        Err(Error::ParseError(format!("Invalid count or index {}", value)))
    }
}

struct PlyData {
    cloud: PointCloud,
    faces: Vec<[usize; 3]>,
}

fn read_ply_data<R: BufRead>(reader: R) -> Result<PlyData> {
    let mut lines = reader.lines();
    let elements = parse_header(&mut lines)?;

    let mut points = Vec::new();
    let mut normals: Option<Vec<Vector3<f32>>> = None;
    let mut colors: Option<Vec<Point3<f32>>> = None;
    let mut faces = Vec::new();

    for element in &elements {
        match element.name.as_str() {
            "vertex" => {
                let layout = VertexLayout::new(element)?;
                // The header count is untrusted; short data is caught row by row.
                let capacity = element.count.min(MAX_PREALLOCATED_ROWS);
                points.reserve(capacity);
                if layout.normal.is_some() {
                    normals = Some(Vec::with_capacity(capacity));
                }
                if layout.color.is_some() {
                    colors = Some(Vec::with_capacity(capacity));
                }

                for _ in 0..element.count {
                    let row = parse_row(&next_line(&mut lines, "vertex data")?, element)?;
                    let get3 = |cols: [usize; 3]| -> Result<[f32; 3]> {
                        Ok([
                            scalar(&row, cols[0])? as f32,
                            scalar(&row, cols[1])? as f32,
                            scalar(&row, cols[2])? as f32,
                        ])
                    };

                    let [x, y, z] = get3(layout.position)?;
                    points.push(Point3::new(x, y, z));
                    if let (Some(cols), Some(out)) = (layout.normal, normals.as_mut()) {
                        let [nx, ny, nz] = get3(cols)?;
                        out.push(Vector3::new(nx, ny, nz));
                    }
                    if let (Some((cols, scale)), Some(out)) = (layout.color, colors.as_mut()) {
                        let [r, g, b] = get3(cols)?;
                        out.push(Point3::new(r * scale, g * scale, b * scale));
                    }
                }
            }
            "face" => {
                let list = element
                    .position("vertex_indices")
                    .or_else(|| element.position("vertex_index"))
                    .ok_or_else(|| Error::ParseError("Face element lacks vertex_indices".into()))?;

                for _ in 0..element.count {
                    let row = parse_row(&next_line(&mut lines, "face data")?, element)?;
                    let Value::List(indices) = &row[list] else {
                        return Err(Error::ParseError("vertex_indices is not a list".into()));
                    };
                    let indices = indices
                        .iter()
                        .map(|&v| index_value(v))
                        .collect::<Result<Vec<usize>>>()?;
                    // fan-triangulate polygons
                    for k in 1..indices.len().saturating_sub(1) {
                        faces.push([indices[0], indices[k], indices[k + 1]]);
                    }
                }
            }
            _ => {
                for _ in 0..element.count {
                    next_line(&mut lines, "element data")?;
                }
            }
        }
    }

    if let Some(bad) = faces.iter().flatten().find(|&&v| v >= points.len()) {
        return Err(Error::ParseError(format!(
            "Face index {} out of range for {} vertices",
            bad,
            points.len()
        )));
    }

    Ok(PlyData {
        cloud: PointCloud {
            points,
            colors,
            normals,
        },
        faces,
    })
}

/// Read a point cloud from an ASCII PLY reader. Faces, if any, are ignored.
pub fn read_ply<R: BufRead>(reader: R) -> Result<PointCloud> {
    Ok(read_ply_data(reader)?.cloud)
}

/// Read a triangle mesh from an ASCII PLY reader. Polygons are fan-triangulated.
pub fn read_ply_mesh<R: BufRead>(reader: R) -> Result<TriangleMesh> {
    let data = read_ply_data(reader)?;
    Ok(TriangleMesh {
        vertices: data.cloud.points,
        faces: data.faces,
        normals: data.cloud.normals,
        colors: data.cloud.colors,
    })
}

fn color_to_u8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn write_vertices<W: Write>(
    writer: &mut W,
    points: &[Point3<f32>],
    normals: Option<&Vec<Vector3<f32>>>,
    colors: Option<&Vec<Point3<f32>>>,
) -> Result<()> {
    writeln!(writer, "element vertex {}", points.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    if normals.is_some() {
        writeln!(writer, "property float nx")?;
        writeln!(writer, "property float ny")?;
        writeln!(writer, "property float nz")?;
    }
    if colors.is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    Ok(())
}

fn write_vertex_rows<W: Write>(
    writer: &mut W,
    points: &[Point3<f32>],
    normals: Option<&Vec<Vector3<f32>>>,
    colors: Option<&Vec<Point3<f32>>>,
) -> Result<()> {
    for (i, p) in points.iter().enumerate() {
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;
        if let Some(normals) = normals {
            let n = normals[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }
        if let Some(colors) = colors {
            let c = colors[i];
            write!(
                writer,
                " {} {} {}",
                color_to_u8(c.x),
                color_to_u8(c.y),
                color_to_u8(c.z)
            )?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

fn check_attribute<T>(name: &str, attr: Option<&Vec<T>>, expected: usize) -> Result<()> {
    match attr {
        Some(values) if values.len() != expected => Err(Error::InvalidInput(format!(
            "{} count {} does not match vertex count {}",
            name,
            values.len(),
            expected
        ))),
        _ => Ok(()),
    }
}

/// Write a point cloud to PLY format
pub fn write_ply<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    let normals = cloud.normals.as_ref();
    let colors = cloud.colors.as_ref();
    check_attribute("Normal", normals, cloud.len())?;
    check_attribute("Color", colors, cloud.len())?;

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    write_vertices(writer, &cloud.points, normals, colors)?;
    writeln!(writer, "end_header")?;
    write_vertex_rows(writer, &cloud.points, normals, colors)
}

/// Write a triangle mesh to PLY format
pub fn write_ply_mesh<W: Write>(writer: &mut W, mesh: &TriangleMesh) -> Result<()> {
    let normals = mesh.normals.as_ref();
    let colors = mesh.colors.as_ref();
    check_attribute("Normal", normals, mesh.num_vertices())?;
    check_attribute("Color", colors, mesh.num_vertices())?;
    if let Some(bad) = mesh.faces.iter().flatten().find(|&&v| v >= mesh.num_vertices()) {
        return Err(Error::InvalidInput(format!(
            "Face index {} out of range for {} vertices",
            bad,
            mesh.num_vertices()
        )));
    }

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "comment room mesh")?;
    write_vertices(writer, &mesh.vertices, normals, colors)?;
    writeln!(writer, "element face {}", mesh.num_faces())?;
    writeln!(writer, "property list uchar int vertex_indices")?;
    writeln!(writer, "end_header")?;
    write_vertex_rows(writer, &mesh.vertices, normals, colors)?;
    for f in &mesh.faces {
        writeln!(writer, "3 {} {} {}", f[0], f[1], f[2])?;
    }
    Ok(())
}

/// Write a point cloud to a PLY file at `path`.
pub fn save_ply<P: AsRef<Path>>(path: P, cloud: &PointCloud) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_ply(&mut writer, cloud)?;
    writer.flush()?;
    Ok(())
}

/// Write a triangle mesh to a PLY file at `path`.
pub fn save_ply_mesh<P: AsRef<Path>>(path: P, mesh: &TriangleMesh) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_ply_mesh(&mut writer, mesh)?;
    writer.flush()?;
    Ok(())
}

pub fn load_ply<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    read_ply(BufReader::new(File::open(path)?))
}

pub fn load_ply_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
    read_ply_mesh(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_respects_property_order() {
        let data = "ply\nformat ascii 1.0\ncomment colors first\nelement vertex 2\n\
                    property uchar red\nproperty uchar green\nproperty uchar blue\n\
                    property float x\nproperty float y\nproperty float z\nend_header\n\
                    255 0 0 1 2 3\n0 255 0 4 5 6\n";
        let cloud = read_ply(Cursor::new(data)).unwrap();
        assert_eq!(cloud.points, vec![Point3::new(1.0, 2.0, 3.0), Point3::new(4.0, 5.0, 6.0)]);
        assert_eq!(cloud.colors.unwrap()[1], Point3::new(0.0, 1.0, 0.0));
        assert!(cloud.normals.is_none());
    }

    #[test]
    fn test_read_quad_is_fan_triangulated() {
        let data = "ply\nformat ascii 1.0\nelement vertex 4\nproperty float x\n\
                    property float y\nproperty float z\nelement face 1\n\
                    property list uchar int vertex_indices\nend_header\n\
                    0 0 0\n1 0 0\n1 1 0\n0 1 0\n4 0 1 2 3\n";
        let mesh = read_ply_mesh(Cursor::new(data)).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_rejects_binary_and_bad_indices() {
        let binary = "ply\nformat binary_little_endian 1.0\nelement vertex 0\n\
                      property float x\nproperty float y\nproperty float z\nend_header\n";
        assert!(matches!(
            read_ply(Cursor::new(binary)),
            Err(Error::UnsupportedFormat(_))
        ));

        let bad = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\n\
                   property float y\nproperty float z\nelement face 1\n\
                   property list uchar int vertex_indices\nend_header\n0 0 0\n3 0 1 2\n";
        assert!(matches!(read_ply_mesh(Cursor::new(bad)), Err(Error::ParseError(_))));

        assert!(read_ply(Cursor::new("ply\nformat ascii 1.0\n")).is_err());
    }

    #[test]
    fn test_write_mesh_header() {
        let mut mesh = TriangleMesh::with_vertices_and_faces(
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            vec![[0, 1, 2]],
        );
        mesh.colors = Some(vec![Point3::new(1.0, 0.5, 0.0); 3]);

        let mut buf = Vec::new();
        write_ply_mesh(&mut buf, &mesh).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("element vertex 3\n"));
        assert!(text.contains("property uchar red\n"));
        assert!(text.contains("element face 1\nproperty list uchar int vertex_indices\n"));
        assert!(text.contains("0 0 0 255 128 0\n"));
        assert!(text.ends_with("3 0 1 2\n"));
    }

    #[test]
    fn test_write_rejects_out_of_range_face() {
        let mesh = TriangleMesh::with_vertices_and_faces(vec![Point3::origin()], vec![[0, 1, 2]]);
        assert!(write_ply_mesh(&mut Vec::new(), &mesh).is_err());
    }
}
