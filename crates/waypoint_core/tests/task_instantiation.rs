use rusqlite::Connection;
use serde_json::json;
use waypoint_core::db::open_db_in_memory;
use waypoint_core::repo::student_repo::{SqliteStudentRepository, StudentRepository};
use waypoint_core::repo::task_repo::SqliteTaskRepository;
use waypoint_core::repo::template_repo::{SqliteTemplateRepository, TemplateRepository};
use waypoint_core::service::task_service::{InstantiateOptions, NewTask, TaskServiceError};
use waypoint_core::sync::{DomainEvent, NotificationKind, Recipient};
use waypoint_core::{
    Counselor, RoadmapKey, Student, StudentTracker, TaskService, TaskTemplate, TaskType,
};

type Service<'c> = TaskService<
    SqliteTemplateRepository<'c>,
    SqliteTaskRepository<'c>,
    SqliteStudentRepository<'c>,
>;

#[test]
fn instantiation_resolves_overrides_and_defers_assignment_until_visible() {
    let conn = open_db_in_memory().unwrap();
    let (counselor, student) = seed_people(&conn);
    let templates = SqliteTemplateRepository::new(&conn);

    let canonical = canonical_template("essay.common-app", "Draft Common App essay");
    templates.create_task_template(&canonical).unwrap();
    let override_template = TaskTemplate::new_override(
        counselor.id,
        RoadmapKey::new("essay.common-app").unwrap(),
        "Draft essay with my outline",
    );
    templates.create_task_template(&override_template).unwrap();

    let service = task_service(&conn);
    let hidden = service
        .instantiate_template(
            student.id,
            canonical.id,
            &InstantiateOptions::default(),
            1_000,
        )
        .unwrap();
    assert_eq!(hidden.task_template_id, Some(override_template.id));
    assert_eq!(hidden.title, "Draft essay with my outline");
    assert!(!hidden.visible_to_student);
    assert_eq!(hidden.assigned_at, None);

    let visible = service
        .instantiate_template(
            student.id,
            canonical.id,
            &InstantiateOptions {
                visible_to_student: true,
                due_at: Some(5_000),
                ..InstantiateOptions::default()
            },
            2_000,
        )
        .unwrap();
    assert!(visible.visible_to_student);
    assert_eq!(visible.assigned_at, Some(2_000));
    assert_eq!(visible.due_at, Some(5_000));
}

#[test]
fn custom_tasks_follow_counseling_assignment_rules() {
    let conn = open_db_in_memory().unwrap();
    let (_, student) = seed_people(&conn);
    let service = task_service(&conn);

    // A plain task is assigned immediately even while hidden.
    let mut spec = NewTask::new("Collect transcripts");
    spec.task_type = TaskType::Transcripts;
    spec.visible_to_student = false;
    let plain = service.create_task(student.id, &spec, 1_000).unwrap();
    assert_eq!(plain.assigned_at, Some(1_000));

    // A counselor-created task defers assignment until it becomes visible.
    let mut spec = NewTask::new("Prep for interview");
    spec.created_by_counselor = true;
    spec.visible_to_student = false;
    let counseling = service.create_task(student.id, &spec, 1_000).unwrap();
    assert_eq!(counseling.assigned_at, None);

    let shown = service.set_visible(counseling.id, true, 3_000).unwrap();
    assert_eq!(shown.assigned_at, Some(3_000));

    // Hiding and re-showing never re-stamps.
    let hidden = service.set_visible(counseling.id, false, 4_000).unwrap();
    assert_eq!(hidden.assigned_at, Some(3_000));
    let shown_again = service.set_visible(counseling.id, true, 5_000).unwrap();
    assert_eq!(shown_again.assigned_at, Some(3_000));
}

#[test]
fn completion_applies_tracker_side_effects_and_notifies_the_counselor() {
    let conn = open_db_in_memory().unwrap();
    let (counselor, student) = seed_people(&conn);
    let templates = SqliteTemplateRepository::new(&conn);
    let students = SqliteStudentRepository::new(&conn);

    let mut template = canonical_template("testing.sat", "Take the SAT");
    template
        .on_assign_tracker_update
        .insert("sat_status".to_string(), json!("scheduled"));
    template
        .on_complete_tracker_update
        .insert("sat_status".to_string(), json!("done"));
    templates.create_task_template(&template).unwrap();

    let mut tracker = StudentTracker::new(student.id, "Testing");
    tracker.values.insert("sat_status".to_string(), json!(null));
    students.create_tracker(&tracker).unwrap();

    let service = task_service(&conn);
    let task = service
        .instantiate_template(
            student.id,
            template.id,
            &InstantiateOptions::default(),
            1_000,
        )
        .unwrap();

    service.attach_tracker(task.id, tracker.id).unwrap();
    let after_assign = students.get_tracker(tracker.id).unwrap().unwrap();
    assert_eq!(after_assign.values["sat_status"], json!("scheduled"));

    let (completed, events) = service.complete_task(task.id, 8_000).unwrap();
    assert_eq!(completed.completed_at, Some(8_000));
    let after_complete = students.get_tracker(tracker.id).unwrap().unwrap();
    assert_eq!(after_complete.values["sat_status"], json!("done"));

    assert_eq!(events.len(), 1);
    match &events[0] {
        DomainEvent::NotificationRequested(notification) => {
            assert_eq!(notification.recipient, Recipient::Counselor(counselor.id));
            assert_eq!(notification.kind, NotificationKind::TaskCompleted);
            assert_eq!(notification.task_id, Some(task.id));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Completion is not repeatable.
    assert!(matches!(
        service.complete_task(task.id, 9_000),
        Err(TaskServiceError::AlreadyCompleted(_))
    ));
}

#[test]
fn only_alter_list_protects_counselor_curated_tracker_values() {
    let conn = open_db_in_memory().unwrap();
    let (_, student) = seed_people(&conn);
    let templates = SqliteTemplateRepository::new(&conn);
    let students = SqliteStudentRepository::new(&conn);

    let mut template = canonical_template("testing.act", "Take the ACT");
    template
        .on_complete_tracker_update
        .insert("act_status".to_string(), json!("done"));
    template.only_alter_tracker_values = vec![json!(null), json!("pending")];
    templates.create_task_template(&template).unwrap();

    let mut tracker = StudentTracker::new(student.id, "Testing");
    tracker
        .values
        .insert("act_status".to_string(), json!("waived"));
    students.create_tracker(&tracker).unwrap();

    let service = task_service(&conn);
    let task = service
        .instantiate_template(
            student.id,
            template.id,
            &InstantiateOptions::default(),
            1_000,
        )
        .unwrap();
    service.attach_tracker(task.id, tracker.id).unwrap();
    service.complete_task(task.id, 2_000).unwrap();

    // "waived" is not in the alterable list, so it survives completion.
    let after = students.get_tracker(tracker.id).unwrap().unwrap();
    assert_eq!(after.values["act_status"], json!("waived"));
}

fn task_service(conn: &Connection) -> Service<'_> {
    TaskService::new(
        SqliteTemplateRepository::new(conn),
        SqliteTaskRepository::new(conn),
        SqliteStudentRepository::new(conn),
    )
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
