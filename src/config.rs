//! Static review configuration.
//!
//! One parameterized `Milestone` definition per review checkpoint replaces
//! the per-review copies the evaluation sheets used to carry. Everything
//! here is seeded into the workspace database on open so report tooling can
//! read it with plain SQL.

use serde::Serialize;

pub const REVIEW_COUNT: i64 = 5;

/// Review number reserved for the cross-review final sheet. It has no
/// criteria or question bank of its own; only the PDF gateway accepts it.
pub const FINAL_SHEET_REVIEW: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Numeric,
    Text,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Numeric => "numeric",
            InputKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub id: &'static str,
    pub label: &'static str,
    pub max_marks: f64,
    pub kind: InputKind,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Question {
    pub code: &'static str,
    pub section: &'static str,
    pub text: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Milestone {
    pub review_no: i64,
    pub title: &'static str,
    pub criteria: &'static [Criterion],
    pub deliverables: &'static [&'static str],
    pub questions: &'static [Question],
}

const fn numeric(id: &'static str, label: &'static str, max_marks: f64) -> Criterion {
    Criterion {
        id,
        label,
        max_marks,
        kind: InputKind::Numeric,
    }
}

const fn text(id: &'static str, label: &'static str) -> Criterion {
    Criterion {
        id,
        label,
        max_marks: 0.0,
        kind: InputKind::Text,
    }
}

const fn question(code: &'static str, section: &'static str, text: &'static str) -> Question {
    Question {
        code,
        section,
        text,
    }
}

const REVIEW0: Milestone = Milestone {
    review_no: 0,
    title: "Synopsis Review",
    criteria: &[
        numeric("problem_statement", "Clarity of problem statement", 5.0),
        numeric("objectives_scope", "Objectives and scope definition", 5.0),
        numeric("literature_survey", "Literature survey depth", 5.0),
        numeric("feasibility", "Technical feasibility", 5.0),
        numeric("presentation_quality", "Presentation quality", 5.0),
        text("synopsis_submitted", "Synopsis document submitted"),
    ],
    deliverables: &["Project synopsis document", "Guide-signed title approval form"],
    questions: &[
        question(
            "que_0.1.1",
            "Problem Definition",
            "Has the problem statement been approved by the guide?",
        ),
        question(
            "que_0.1.2",
            "Problem Definition",
            "Is the project scope achievable within the academic year?",
        ),
        question(
            "que_0.2.1",
            "Team Readiness",
            "Have all members been assigned initial responsibilities?",
        ),
    ],
};

const REVIEW1: Milestone = Milestone {
    review_no: 1,
    title: "Requirement Analysis Review",
    criteria: &[
        numeric("requirement_analysis", "Requirement gathering and analysis", 10.0),
        numeric("system_design", "High level system design", 10.0),
        numeric("technology_stack", "Technology stack justification", 5.0),
        numeric("project_plan", "Project plan and timeline", 5.0),
        numeric("team_participation", "Individual participation", 5.0),
        text("srs_submitted", "SRS document submitted"),
    ],
    deliverables: &["Software requirement specification", "Project plan with milestones"],
    questions: &[
        question(
            "que_1.1.1",
            "Requirements",
            "Are functional requirements traceable to the problem statement?",
        ),
        question(
            "que_1.1.2",
            "Requirements",
            "Have non-functional requirements been quantified?",
        ),
        question(
            "que_1.2.1",
            "Planning",
            "Does the plan account for the mid-semester examination window?",
        ),
        question(
            "que_1.2.2",
            "Planning",
            "Number of use cases identified",
        ),
    ],
};

const REVIEW2: Milestone = Milestone {
    review_no: 2,
    title: "Design Review",
    criteria: &[
        numeric("architecture_design", "Architecture design quality", 10.0),
        numeric("database_design", "Database design", 5.0),
        numeric("interface_design", "Interface design", 5.0),
        numeric("module_breakdown", "Module breakdown and ownership", 5.0),
        numeric("progress_demo", "Working progress demonstration", 10.0),
        text("design_doc_submitted", "Design document submitted"),
    ],
    deliverables: &[
        "System architecture document",
        "Database schema diagram",
        "Module ownership matrix",
    ],
    questions: &[
        question(
            "que_2.1.1",
            "Design",
            "Does the architecture address the stated non-functional requirements?",
        ),
        question(
            "que_2.1.2",
            "Design",
            "Are interface contracts between modules documented?",
        ),
        question(
            "que_2.2.1",
            "Progress",
            "Percentage of planned modules started",
        ),
    ],
};

const REVIEW3: Milestone = Milestone {
    review_no: 3,
    title: "Implementation and Testing Review",
    criteria: &[
        numeric("implementation_status", "Implementation completeness", 10.0),
        numeric("testing_coverage", "Testing coverage", 10.0),
        numeric("test_cases", "Quality of test cases", 7.0),
        numeric("defect_resolution", "Defect tracking and resolution", 5.0),
        numeric("demo_quality", "Demonstration quality", 8.0),
        text("test_report_submitted", "Test report submitted"),
    ],
    deliverables: &["Test plan and test report", "Defect log"],
    questions: &[
        question(
            "que_3.1.1",
            "Testing",
            "Is there an automated test suite for the core modules?",
        ),
        question(
            "que_3.1.2",
            "Testing",
            "Have integration tests been executed against the deployed build?",
        ),
        question(
            "que_3.2.1",
            "Implementation",
            "Number of modules fully implemented",
        ),
    ],
};

const REVIEW4: Milestone = Milestone {
    review_no: 4,
    title: "Final Review",
    criteria: &[
        numeric("final_demo", "Final demonstration", 10.0),
        numeric("results_analysis", "Results and analysis", 10.0),
        numeric("report_quality", "Project report quality", 10.0),
        numeric("publication_status", "Paper publication status", 5.0),
        numeric("viva_performance", "Viva performance", 5.0),
        text("final_report_submitted", "Final report submitted"),
    ],
    deliverables: &[
        "Final project report",
        "Plagiarism check certificate",
        "Working deployment or installable build",
    ],
    questions: &[
        question(
            "que_4.1.1",
            "Outcome",
            "Do the delivered features cover the approved scope?",
        ),
        question(
            "que_4.1.2",
            "Outcome",
            "Has the sponsor or mentor accepted the deliverables?",
        ),
        question(
            "que_4.2.1",
            "Documentation",
            "Is the report formatted per the university template?",
        ),
    ],
};

const MILESTONES: [Milestone; REVIEW_COUNT as usize] =
    [REVIEW0, REVIEW1, REVIEW2, REVIEW3, REVIEW4];

pub fn milestones() -> &'static [Milestone] {
    &MILESTONES
}

pub fn milestone(review_no: i64) -> Option<&'static Milestone> {
    MILESTONES.iter().find(|m| m.review_no == review_no)
}

impl Milestone {
    pub fn criterion(&self, criteria_id: &str) -> Option<&'static Criterion> {
        self.criteria.iter().find(|c| c.id == criteria_id)
    }

    pub fn question(&self, code: &str) -> Option<&'static Question> {
        self.questions.iter().find(|q| q.code == code)
    }
}
