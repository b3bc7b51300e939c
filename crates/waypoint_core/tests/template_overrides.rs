use rusqlite::Connection;
use waypoint_core::db::open_db_in_memory;
use waypoint_core::repo::student_repo::{SqliteStudentRepository, StudentRepository};
use waypoint_core::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use waypoint_core::repo::template_repo::{SqliteTemplateRepository, TemplateRepository};
use waypoint_core::service::template_resolver::{effective_template, OverrideError};
use waypoint_core::{Counselor, RoadmapKey, Student, Task, TaskTemplate, TemplateResolver};

#[test]
fn resolution_prefers_live_override_for_the_students_counselor() {
    let conn = open_db_in_memory().unwrap();
    let templates = SqliteTemplateRepository::new(&conn);
    let (counselor, student) = seed_people(&conn);

    let canonical = canonical_template("essay.common-app", "Draft Common App essay");
    templates.create_task_template(&canonical).unwrap();

    // No override yet: canonical applies.
    let resolved = effective_template(&templates, &student, &canonical).unwrap();
    assert_eq!(resolved.id, canonical.id);

    let override_template = TaskTemplate::new_override(
        counselor.id,
        RoadmapKey::new("essay.common-app").unwrap(),
        "Draft essay with my outline",
    );
    templates.create_task_template(&override_template).unwrap();

    let resolved = effective_template(&templates, &student, &canonical).unwrap();
    assert_eq!(resolved.id, override_template.id);
    assert_eq!(resolved.title, "Draft essay with my outline");

    // A student with no counselor keeps the canonical.
    let students = SqliteStudentRepository::new(&conn);
    let unassigned = Student::new("Solo", None);
    students.create_student(&unassigned).unwrap();
    let resolved = effective_template(&templates, &unassigned, &canonical).unwrap();
    assert_eq!(resolved.id, canonical.id);
}

#[test]
fn resolution_never_substitutes_keyless_or_override_templates() {
    let conn = open_db_in_memory().unwrap();
    let templates = SqliteTemplateRepository::new(&conn);
    let (counselor, student) = seed_people(&conn);

    let keyless = TaskTemplate::new("One-off survey");
    templates.create_task_template(&keyless).unwrap();
    let resolved = effective_template(&templates, &student, &keyless).unwrap();
    assert_eq!(resolved.id, keyless.id);

    // An override resolves to itself even if someone else overrides the key.
    let override_template = TaskTemplate::new_override(
        counselor.id,
        RoadmapKey::new("testing.sat-prep").unwrap(),
        "SAT prep plan",
    );
    templates.create_task_template(&override_template).unwrap();
    let resolved = effective_template(&templates, &student, &override_template).unwrap();
    assert_eq!(resolved.id, override_template.id);
}

#[test]
fn apply_override_resyncs_only_incomplete_tasks_of_owned_students() {
    let conn = open_db_in_memory().unwrap();
    let templates = SqliteTemplateRepository::new(&conn);
    let tasks = SqliteTaskRepository::new(&conn);
    let students = SqliteStudentRepository::new(&conn);
    let (counselor, student) = seed_people(&conn);

    let other_counselor = Counselor::new("Other");
    students.create_counselor(&other_counselor).unwrap();
    let other_student = Student::new("Theirs", Some(other_counselor.id));
    students.create_student(&other_student).unwrap();

    let canonical = canonical_template("essay.common-app", "Draft Common App essay");
    templates.create_task_template(&canonical).unwrap();

    let open_task = task_from(&canonical, student.id);
    tasks.create_task(&open_task).unwrap();
    let mut done_task = task_from(&canonical, student.id);
    done_task.completed_at = Some(500);
    tasks.create_task(&done_task).unwrap();
    let foreign_task = task_from(&canonical, other_student.id);
    tasks.create_task(&foreign_task).unwrap();

    let resolver = TemplateResolver::new(templates, tasks);
    let mut override_template = TaskTemplate::new_override(
        counselor.id,
        RoadmapKey::new("essay.common-app").unwrap(),
        "Draft essay with my outline",
    );
    override_template.description = "Use the shared outline doc".to_string();
    let resynced = resolver.apply_override(&override_template).unwrap();
    assert_eq!(resynced, 1);

    let refreshed = tasks.get_task(open_task.id).unwrap().unwrap();
    assert_eq!(refreshed.task_template_id, Some(override_template.id));
    assert_eq!(refreshed.title, "Draft essay with my outline");
    assert_eq!(refreshed.description, "Use the shared outline doc");

    // Completed history and other counselors' students are untouched.
    let done = tasks.get_task(done_task.id).unwrap().unwrap();
    assert_eq!(done.task_template_id, Some(canonical.id));
    let foreign = tasks.get_task(foreign_task.id).unwrap().unwrap();
    assert_eq!(foreign.task_template_id, Some(canonical.id));
}

#[test]
fn editing_an_existing_override_saves_and_resyncs() {
    let conn = open_db_in_memory().unwrap();
    let templates = SqliteTemplateRepository::new(&conn);
    let tasks = SqliteTaskRepository::new(&conn);
    let (counselor, student) = seed_people(&conn);

    let canonical = canonical_template("essay.common-app", "Draft Common App essay");
    templates.create_task_template(&canonical).unwrap();
    let open_task = task_from(&canonical, student.id);
    tasks.create_task(&open_task).unwrap();

    let resolver = TemplateResolver::new(templates, tasks);
    let mut override_template = TaskTemplate::new_override(
        counselor.id,
        RoadmapKey::new("essay.common-app").unwrap(),
        "Draft essay with my outline",
    );
    assert_eq!(resolver.apply_override(&override_template).unwrap(), 1);

    // The counselor revises the same override in place.
    override_template.title = "Draft essay, second outline".to_string();
    override_template.description = "Outline v2".to_string();
    assert_eq!(resolver.apply_override(&override_template).unwrap(), 1);

    let saved = templates
        .get_task_template(override_template.id)
        .unwrap()
        .unwrap();
    assert_eq!(saved.title, "Draft essay, second outline");

    let refreshed = tasks.get_task(open_task.id).unwrap().unwrap();
    assert_eq!(refreshed.task_template_id, Some(override_template.id));
    assert_eq!(refreshed.title, "Draft essay, second outline");
    assert_eq!(refreshed.description, "Outline v2");
}

#[test]
fn remove_override_resyncs_back_to_the_canonical() {
    let conn = open_db_in_memory().unwrap();
    let templates = SqliteTemplateRepository::new(&conn);
    let tasks = SqliteTaskRepository::new(&conn);
    let (counselor, student) = seed_people(&conn);

    let canonical = canonical_template("essay.common-app", "Draft Common App essay");
    templates.create_task_template(&canonical).unwrap();

    let resolver = TemplateResolver::new(templates, tasks);
    let override_template = TaskTemplate::new_override(
        counselor.id,
        RoadmapKey::new("essay.common-app").unwrap(),
        "Draft essay with my outline",
    );
    resolver.apply_override(&override_template).unwrap();

    let task = task_from(&override_template, student.id);
    tasks.create_task(&task).unwrap();

    let resynced = resolver.remove_override(&override_template, 9_000).unwrap();
    assert_eq!(resynced, 1);

    let refreshed = tasks.get_task(task.id).unwrap().unwrap();
    assert_eq!(refreshed.task_template_id, Some(canonical.id));
    assert_eq!(refreshed.title, "Draft Common App essay");

    let archived = templates
        .get_task_template(override_template.id)
        .unwrap()
        .unwrap();
    assert_eq!(archived.archived_at, Some(9_000));

    // The key resolves back to the canonical.
    let students = SqliteStudentRepository::new(&conn);
    let student = students.get_student(student.id).unwrap().unwrap();
    let resolved = effective_template(&templates, &student, &canonical).unwrap();
    assert_eq!(resolved.id, canonical.id);
}

#[test]
fn apply_override_rejects_missing_owner_or_key() {
    let conn = open_db_in_memory().unwrap();
    let templates = SqliteTemplateRepository::new(&conn);
    let tasks = SqliteTaskRepository::new(&conn);
    let (counselor, _) = seed_people(&conn);
    let resolver = TemplateResolver::new(templates, tasks);

    let keyless = TaskTemplate::new("No key");
    assert!(matches!(
        resolver.apply_override(&keyless),
        Err(OverrideError::MissingOwner)
    ));

    let mut owned_keyless = TaskTemplate::new("Still no key");
    owned_keyless.owner_id = Some(counselor.id);
    assert!(matches!(
        resolver.apply_override(&owned_keyless),
        Err(OverrideError::MissingKey)
    ));
}

fn seed_people(conn: &Connection) -> (Counselor, Student) {
    let students = SqliteStudentRepository::new(conn);
    let counselor = Counselor::new("Counselor");
    students.create_counselor(&counselor).unwrap();
    let student = Student::new("Student", Some(counselor.id));
    students.create_student(&student).unwrap();
    (counselor, student)
}

fn canonical_template(key: &str, title: &str) -> TaskTemplate {
    let mut template = TaskTemplate::new(title);
    template.roadmap_key = Some(RoadmapKey::new(key).unwrap());
    template
}

fn task_from(template: &TaskTemplate, student_id: waypoint_core::StudentId) -> Task {
    let mut task = Task::new(student_id, template.title.clone());
    task.sync_from_template(template);
    task
}
