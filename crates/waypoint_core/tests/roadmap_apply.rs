use rusqlite::Connection;
use waypoint_core::db::open_db_in_memory;
use waypoint_core::repo::meeting_repo::{MeetingRepository, SqliteMeetingRepository};
use waypoint_core::repo::student_repo::{SqliteStudentRepository, StudentRepository};
use waypoint_core::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use waypoint_core::repo::template_repo::{SqliteTemplateRepository, TemplateRepository};
use waypoint_core::service::roadmap_service::RoadmapServiceError;
use waypoint_core::{
    Actor, AgendaItemTemplate, Counselor, MeetingPhase, MeetingService, MeetingTemplate,
    NewMeeting, PlannedMeeting, Roadmap, RoadmapKey, RoadmapService, Student, Task, TaskTemplate,
};

type Service<'c> = RoadmapService<
    SqliteMeetingRepository<'c>,
    SqliteTemplateRepository<'c>,
    SqliteTaskRepository<'c>,
    SqliteStudentRepository<'c>,
>;

#[test]
fn default_application_materializes_default_meetings_and_all_tasks() {
    let conn = open_db_in_memory().unwrap();
    let (_, student) = seed_people(&conn);
    let catalog = seed_catalog(&conn);
    let service = roadmap_service(&conn);
    let tasks = SqliteTaskRepository::new(&conn);
    let meetings = SqliteMeetingRepository::new(&conn);

    let applied = service
        .apply_to_student(student.id, catalog.roadmap.id, None, 1_000)
        .unwrap();

    // Only the template marked for default application becomes a meeting.
    assert_eq!(applied.meetings.len(), 1);
    let kickoff = &applied.meetings[0];
    assert_eq!(kickoff.meeting_template_id, Some(catalog.kickoff.id));
    let agenda = meetings.agenda_items_for_meeting(kickoff.id).unwrap();
    assert_eq!(agenda.len(), 1);

    // Both tasks exist: one linked to the meeting, one residual.
    assert_eq!(applied.tasks.len(), 2);
    let kickoff_task = applied
        .tasks
        .iter()
        .find(|task| task.title == "Fill out testing survey")
        .expect("kickoff task should be instantiated");
    assert_eq!(
        tasks.meetings_for_task(kickoff_task.id).unwrap(),
        vec![kickoff.id]
    );
    assert_eq!(kickoff_task.meeting_template_ref, None);
    assert!(!kickoff_task.visible_to_student);
    assert_eq!(kickoff_task.assigned_at, None);
    assert_eq!(kickoff_task.due_at, None);

    let residual_task = applied
        .tasks
        .iter()
        .find(|task| task.title == "Draft Common App essay")
        .expect("residual task should be instantiated");
    assert!(tasks.meetings_for_task(residual_task.id).unwrap().is_empty());
    assert_eq!(
        residual_task.meeting_template_ref,
        Some(catalog.essay_review.id)
    );
}

#[test]
fn application_resolves_overrides_and_dedups_by_roadmap_key() {
    let conn = open_db_in_memory().unwrap();
    let (counselor, student) = seed_people(&conn);
    let catalog = seed_catalog(&conn);
    let templates = SqliteTemplateRepository::new(&conn);
    let tasks = SqliteTaskRepository::new(&conn);
    let service = roadmap_service(&conn);

    let override_template = TaskTemplate::new_override(
        counselor.id,
        RoadmapKey::new("survey.testing").unwrap(),
        "Testing survey (my version)",
    );
    templates.create_task_template(&override_template).unwrap();

    // The student already completed the essay task from the canonical
    // template; the shared key must suppress re-instantiation.
    let mut existing = Task::new(student.id, catalog.essay_template.title.clone());
    existing.sync_from_template(&catalog.essay_template);
    existing.completed_at = Some(500);
    tasks.create_task(&existing).unwrap();

    let applied = service
        .apply_to_student(student.id, catalog.roadmap.id, None, 1_000)
        .unwrap();

    assert_eq!(applied.tasks.len(), 1);
    let survey = &applied.tasks[0];
    assert_eq!(survey.task_template_id, Some(override_template.id));
    assert_eq!(survey.title, "Testing survey (my version)");
}

#[test]
fn custom_plans_select_meetings_and_reject_foreign_templates() {
    let conn = open_db_in_memory().unwrap();
    let (_, student) = seed_people(&conn);
    let catalog = seed_catalog(&conn);
    let templates = SqliteTemplateRepository::new(&conn);
    let meetings = SqliteMeetingRepository::new(&conn);
    let service = roadmap_service(&conn);

    let other_roadmap = Roadmap::new("Transfer Track");
    templates.create_roadmap(&other_roadmap).unwrap();
    let foreign = MeetingTemplate::new(other_roadmap.id, "Transfer intake", 1);
    templates.create_meeting_template(&foreign).unwrap();

    let err = service
        .apply_to_student(
            student.id,
            catalog.roadmap.id,
            Some(&[PlannedMeeting::new(foreign.id)]),
            1_000,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RoadmapServiceError::TemplateNotOnRoadmap { .. }
    ));

    // An agenda item template hanging off another roadmap is rejected even
    // when the planned meeting template itself is legitimate.
    let foreign_agenda = AgendaItemTemplate::new(foreign.id, "Transfer checklist", 1);
    templates.create_agenda_item_template(&foreign_agenda).unwrap();
    let mut smuggled = PlannedMeeting::new(catalog.kickoff.id);
    smuggled.agenda_item_template_ids = vec![foreign_agenda.id];
    let err = service
        .apply_to_student(student.id, catalog.roadmap.id, Some(&[smuggled]), 1_000)
        .unwrap_err();
    assert!(matches!(
        err,
        RoadmapServiceError::AgendaItemTemplateNotFound(id) if id == foreign_agenda.id
    ));

    // A late-start plan takes only the essay review, renamed, with an
    // extra counselor-authored agenda line.
    let mut planned = PlannedMeeting::new(catalog.essay_review.id);
    planned.title = Some("Senior crunch session".to_string());
    planned.custom_agenda_items = vec!["Catch up on missed milestones".to_string()];
    let applied = service
        .apply_to_student(student.id, catalog.roadmap.id, Some(&[planned]), 1_000)
        .unwrap();

    assert_eq!(applied.meetings.len(), 1);
    assert_eq!(applied.meetings[0].title, "Senior crunch session");
    let agenda = meetings
        .agenda_items_for_meeting(applied.meetings[0].id)
        .unwrap();
    assert_eq!(agenda.len(), 2);

    // The kickoff's task still materializes as a residual.
    assert!(applied
        .tasks
        .iter()
        .any(|task| task.meeting_template_ref == Some(catalog.kickoff.id)));
}

#[test]
fn non_repeatable_roadmaps_apply_once() {
    let conn = open_db_in_memory().unwrap();
    let (_, student) = seed_people(&conn);
    let catalog = seed_catalog(&conn);
    let service = roadmap_service(&conn);

    service
        .apply_to_student(student.id, catalog.roadmap.id, None, 1_000)
        .unwrap();
    let err = service
        .apply_to_student(student.id, catalog.roadmap.id, None, 2_000)
        .unwrap_err();
    assert!(matches!(err, RoadmapServiceError::AlreadyApplied { .. }));
}

#[test]
fn unapply_preserves_history_and_deletes_the_rest() {
    let conn = open_db_in_memory().unwrap();
    let (_, student) = seed_people(&conn);
    let catalog = seed_catalog(&conn);
    let service = roadmap_service(&conn);
    let tasks = SqliteTaskRepository::new(&conn);
    let meetings = SqliteMeetingRepository::new(&conn);
    let meeting_service = MeetingService::new(
        SqliteMeetingRepository::new(&conn),
        SqliteTemplateRepository::new(&conn),
        SqliteTaskRepository::new(&conn),
        SqliteStudentRepository::new(&conn),
    );

    let applied = service
        .apply_to_student(student.id, catalog.roadmap.id, None, 1_000)
        .unwrap();
    let kickoff = &applied.meetings[0];

    // An extra meeting from the same roadmap, already held in the past.
    let past = meeting_service
        .create_meeting(
            student.id,
            &NewMeeting {
                meeting_template_id: Some(catalog.essay_review.id),
                ..NewMeeting::default()
            },
        )
        .unwrap();
    meeting_service
        .schedule(past.id, 1_000, 2_000, Actor::Student(student.id), 1_500)
        .unwrap();

    // One of the tasks is already done.
    let survey = applied
        .tasks
        .iter()
        .find(|task| task.title == "Fill out testing survey")
        .unwrap();
    let mut done = tasks.get_task(survey.id).unwrap().unwrap();
    done.completed_at = Some(3_000);
    tasks.update_task(&done).unwrap();

    let removed = service
        .unapply_from_student(student.id, catalog.roadmap.id, 50_000)
        .unwrap();
    assert_eq!(removed.meetings_deleted, 1);
    assert_eq!(removed.tasks_deleted, 1);

    // The unscheduled kickoff is gone; the held meeting survives.
    assert!(meetings.get_meeting(kickoff.id).unwrap().is_none());
    assert!(meetings.get_meeting(past.id).unwrap().is_some());

    // The completed task survives; the incomplete essay task is gone.
    assert!(tasks.get_task(survey.id).unwrap().is_some());
    let remaining = tasks.tasks_for_student(student.id).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, survey.id);

    let err = service
        .unapply_from_student(student.id, catalog.roadmap.id, 60_000)
        .unwrap_err();
    assert!(matches!(err, RoadmapServiceError::NotApplied { .. }));
}

struct Catalog {
    roadmap: Roadmap,
    kickoff: MeetingTemplate,
    essay_review: MeetingTemplate,
    essay_template: TaskTemplate,
}

fn seed_catalog(conn: &Connection) -> Catalog {
    let templates = SqliteTemplateRepository::new(conn);

    let roadmap = Roadmap::new("Senior Year");
    templates.create_roadmap(&roadmap).unwrap();

    let kickoff = MeetingTemplate::new(roadmap.id, "Senior kickoff", 1);
    templates.create_meeting_template(&kickoff).unwrap();
    let kickoff_agenda = AgendaItemTemplate::new(kickoff.id, "Plan the fall", 1);
    templates.create_agenda_item_template(&kickoff_agenda).unwrap();
    let mut survey_template = TaskTemplate::new("Fill out testing survey");
    survey_template.roadmap_key = Some(RoadmapKey::new("survey.testing").unwrap());
    templates.create_task_template(&survey_template).unwrap();
    templates
        .link_task_template(kickoff_agenda.id, survey_template.id, MeetingPhase::Pre)
        .unwrap();

    // A second meeting excluded from default application.
    let mut essay_review = MeetingTemplate::new(roadmap.id, "Essay review", 2);
    essay_review.create_when_applying_roadmap = false;
    templates.create_meeting_template(&essay_review).unwrap();
    let essay_agenda = AgendaItemTemplate::new(essay_review.id, "Review essay draft", 1);
    templates.create_agenda_item_template(&essay_agenda).unwrap();
    let mut essay_template = TaskTemplate::new("Draft Common App essay");
    essay_template.roadmap_key = Some(RoadmapKey::new("essay.common-app").unwrap());
    templates.create_task_template(&essay_template).unwrap();
    templates
        .link_task_template(essay_agenda.id, essay_template.id, MeetingPhase::Pre)
        .unwrap();

    Catalog {
        roadmap,
        kickoff,
        essay_review,
        essay_template,
    }
}

fn roadmap_service(conn: &Connection) -> Service<'_> {
    RoadmapService::new(
        SqliteMeetingRepository::new(conn),
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
