use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .env_remove("ROSTERD_WORKSPACE")
        .env("ROSTERD_DEFAULT_YEAR", "2024")
        .env("ROSTERD_HISTORY_ACTOR", "Test Registrar")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn mapping() -> serde_json::Value {
    json!({
        "nombre": "Nombre",
        "apellido": "Apellido",
        "correo": "Correo",
        "carrera": "Carrera",
        "telefono": "Telefono",
        "fecha_nacimiento": "Nacimiento",
        "semestre": "Semestre",
        "semestre_anio": "Anio",
        "materia": "Materia",
        "evaluacion": "Evaluacion",
        "nota": "Nota",
        "porcentaje": "Porcentaje"
    })
}

fn find_student_id(students: &serde_json::Value, email: &str) -> i64 {
    students
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students array")
        .iter()
        .find(|s| s.get("email").and_then(|v| v.as_str()) == Some(email))
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| panic!("student {} not listed", email))
}

fn approx(v: &serde_json::Value, expected: f64) -> bool {
    v.as_f64().map(|x| (x - expected).abs() < 1e-9).unwrap_or(false)
}

#[test]
fn basic_import_counts_duplicates_and_failures() {
    let workspace = temp_dir("rosterd-migration-basic");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let rows = json!([
        { "Nombre": " Ana ", "Apellido": "Pérez", "Correo": "ANA@uni.edu ", "Carrera": "Ingeniería", "Telefono": "0991", "Semestre": "4" },
        { "Nombre": "Ana", "Apellido": "Pérez", "Correo": "ana@uni.edu", "Carrera": "Ingeniería" },
        { "Nombre": "", "Apellido": "Mora", "Correo": "luis@uni.edu", "Carrera": "Derecho" },
        "not an object",
        { "Nombre": "Eva", "Apellido": "Ruiz", "Correo": "eva@uni.edu", "Carrera": "Medicina", "Semestre": "N/A" }
    ]);
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "migration.execute",
        json!({
            "rows": rows,
            "mapping": mapping(),
            "options": { "trimSpaces": true, "skipDuplicates": true, "migrationMode": "basic" }
        }),
    );
    assert_eq!(result.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(result.get("mode").and_then(|v| v.as_str()), Some("basic"));
    assert_eq!(result.get("total").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(result.get("successCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(result.get("skipped").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(result.get("errors").and_then(|v| v.as_u64()), Some(2));
    let codes: Vec<&str> = result
        .get("issues")
        .and_then(|v| v.as_array())
        .expect("issues")
        .iter()
        .filter_map(|i| i.get("code").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(codes, vec!["duplicate_skipped", "missing_required", "extraction_failed"]);

    let students = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    let ana = find_student_id(&students, "ana@uni.edu");
    let eva = find_student_id(&students, "eva@uni.edu");

    let detail = request_ok(&mut stdin, &mut reader, "4", "students.detail", json!({ "studentId": ana }));
    let student = detail.get("student").expect("student");
    assert_eq!(student.get("firstName").and_then(|v| v.as_str()), Some("Ana"));
    assert_eq!(student.get("career").and_then(|v| v.as_str()), Some("Ingenieria"));
    assert_eq!(student.get("phone").and_then(|v| v.as_str()), Some("0991"));
    assert_eq!(student.get("semester").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(detail.get("semesters").and_then(|v| v.as_array()).map(|a| a.len()), Some(0));

    let detail = request_ok(&mut stdin, &mut reader, "5", "students.detail", json!({ "studentId": eva }));
    assert_eq!(
        detail.get("student").and_then(|s| s.get("semester")).and_then(|v| v.as_i64()),
        Some(1)
    );

    // Existing students are skipped on a second run.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "migration.execute",
        json!({
            "rows": [{ "Nombre": "Eva", "Apellido": "Ruiz", "Correo": " EVA@UNI.EDU", "Carrera": "Medicina" }],
            "mapping": mapping()
        }),
    );
    assert_eq!(again.get("successCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(again.get("skipped").and_then(|v| v.as_u64()), Some(1));

    let history = request_ok(&mut stdin, &mut reader, "7", "migration.history", json!({}));
    let entries = history.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 2);
    let latest = &entries[0];
    assert_eq!(latest.get("total").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(latest.get("skipped").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(latest.get("actor").and_then(|v| v.as_str()), Some("Test Registrar"));
    assert_eq!(latest.get("label").and_then(|v| v.as_str()), Some("Archivo importado"));
    assert_eq!(
        latest.get("runId").and_then(|v| v.as_str()),
        again.get("runId").and_then(|v| v.as_str())
    );
    let first = &entries[1];
    assert_eq!(first.get("success").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(first.get("errors").and_then(|v| v.as_i64()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn complete_import_builds_academic_graph() {
    let workspace = temp_dir("rosterd-migration-complete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let rows = json!([
        { "Nombre": "Ana", "Apellido": "Pérez", "Correo": "ana@uni.edu", "Carrera": "Medicina",
          "Semestre": 2, "Anio": 2023, "Materia": "Calculo", "Evaluacion": "Parcial", "Nota": 16, "Porcentaje": 30 },
        { "Nombre": "Ana", "Apellido": "Pérez", "Correo": "ANA@uni.edu", "Carrera": "Medicina",
          "Semestre": 2, "Anio": 2023, "Materia": "Calculo", "Evaluacion": "Final", "Nota": 14, "Porcentaje": 70 },
        { "Nombre": "Ana", "Apellido": "Pérez", "Correo": "ana@uni.edu", "Carrera": "Medicina",
          "Semestre": "3", "Materia": "Fisica", "Evaluacion": "Unica", "Nota": "10", "Porcentaje": "50" },
        { "Nombre": "Luis", "Apellido": "Mora", "Correo": "luis@uni.edu", "Carrera": "Derecho",
          "Materia": "Historia" },
        { "Nombre": "Sin", "Apellido": "Correo", "Correo": "", "Carrera": "Derecho",
          "Materia": "Historia", "Evaluacion": "P1", "Nota": 12, "Porcentaje": 100 }
    ]);
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "migration.execute",
        json!({
            "rows": rows,
            "mapping": mapping(),
            "label": "notas.xlsx",
            "type": "excel",
            "options": { "trimSpaces": true, "migrationMode": "complete" }
        }),
    );
    assert_eq!(result.get("mode").and_then(|v| v.as_str()), Some("complete"));
    assert_eq!(result.get("total").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(result.get("successCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(result.get("errors").and_then(|v| v.as_u64()), Some(1));

    let students = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(students.get("students").and_then(|v| v.as_array()).map(|a| a.len()), Some(2));
    let ana = find_student_id(&students, "ana@uni.edu");
    let luis = find_student_id(&students, "luis@uni.edu");

    let detail = request_ok(&mut stdin, &mut reader, "4", "students.detail", json!({ "studentId": ana }));
    let semesters = detail.get("semesters").and_then(|v| v.as_array()).expect("semesters");
    assert_eq!(semesters.len(), 2);
    // Newest year first.
    assert_eq!(semesters[0].get("year").and_then(|v| v.as_i64()), Some(2024));
    assert_eq!(semesters[0].get("number").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(semesters[0].get("status").and_then(|v| v.as_str()), Some("active"));
    let fisica = &semesters[0].get("subjects").and_then(|v| v.as_array()).expect("subjects")[0];
    assert_eq!(fisica.get("name").and_then(|v| v.as_str()), Some("Fisica"));
    assert!(approx(fisica.get("finalGrade").expect("grade"), 10.0));

    assert_eq!(semesters[1].get("year").and_then(|v| v.as_i64()), Some(2023));
    let calculo = &semesters[1].get("subjects").and_then(|v| v.as_array()).expect("subjects")[0];
    assert_eq!(calculo.get("name").and_then(|v| v.as_str()), Some("Calculo"));
    assert!(approx(calculo.get("finalGrade").expect("grade"), 14.6));
    let evals: Vec<&str> = calculo
        .get("evaluations")
        .and_then(|v| v.as_array())
        .expect("evaluations")
        .iter()
        .filter_map(|e| e.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(evals, vec!["Parcial", "Final"]);

    let detail = request_ok(&mut stdin, &mut reader, "5", "students.detail", json!({ "studentId": luis }));
    assert_eq!(detail.get("semesters").and_then(|v| v.as_array()).map(|a| a.len()), Some(0));

    let subjects = request_ok(&mut stdin, &mut reader, "6", "students.subjects", json!({ "studentId": ana }));
    let names: Vec<&str> = subjects
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects")
        .iter()
        .filter_map(|s| s.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["Fisica", "Calculo"]);

    let history = request_ok(&mut stdin, &mut reader, "7", "migration.history", json!({ "limit": 1 }));
    let entries = history.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("label").and_then(|v| v.as_str()), Some("notas.xlsx"));
    assert_eq!(entries[0].get("sourceKind").and_then(|v| v.as_str()), Some("excel"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_and_invalid_requests() {
    let workspace = temp_dir("rosterd-migration-edge");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let early = request(
        &mut stdin,
        &mut reader,
        "1",
        "migration.execute",
        json!({ "rows": [], "mapping": mapping() }),
    );
    assert_eq!(error_code(&early), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "migration.execute",
        json!({ "rows": [], "mapping": mapping(), "options": { "migrationMode": "complete" } }),
    );
    for key in ["total", "successCount", "skipped", "errors"] {
        assert_eq!(empty.get(key).and_then(|v| v.as_u64()), Some(0), "{}", key);
    }
    let history = request_ok(&mut stdin, &mut reader, "4", "migration.history", json!({}));
    assert_eq!(history.get("entries").and_then(|v| v.as_array()).map(|a| a.len()), Some(1));

    let bad_mode = request(
        &mut stdin,
        &mut reader,
        "5",
        "migration.execute",
        json!({ "rows": [], "mapping": mapping(), "options": { "migrationMode": "full" } }),
    );
    assert_eq!(error_code(&bad_mode), "bad_params");

    let no_mapping = request(&mut stdin, &mut reader, "6", "migration.execute", json!({ "rows": [] }));
    assert_eq!(error_code(&no_mapping), "bad_params");

    let bad_rows = request(
        &mut stdin,
        &mut reader,
        "7",
        "migration.execute",
        json!({ "rows": { "a": 1 }, "mapping": mapping() }),
    );
    assert_eq!(error_code(&bad_rows), "bad_params");

    let legacy = request_ok(
        &mut stdin,
        &mut reader,
        "7b",
        "migration.execute",
        json!({
            "data": [{ "Nombre": "Ana", "Apellido": "Paz", "Correo": "ana@uni.edu", "Carrera": "Derecho" }],
            "mapping": mapping()
        }),
    );
    assert_eq!(legacy.get("total").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(legacy.get("successCount").and_then(|v| v.as_u64()), Some(1));

    let bad_data = request(
        &mut stdin,
        &mut reader,
        "7c",
        "migration.execute",
        json!({ "data": "ana@uni.edu", "mapping": mapping() }),
    );
    assert_eq!(error_code(&bad_data), "bad_params");

    let bad_limit = request(&mut stdin, &mut reader, "8", "migration.history", json!({ "limit": 0 }));
    assert_eq!(error_code(&bad_limit), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
