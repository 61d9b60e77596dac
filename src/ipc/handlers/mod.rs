pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod faculty_assignments;
pub mod quarters;
pub mod school_years;
pub mod sections;
pub mod strands;
pub mod student_assignments;
pub mod subjects;
pub mod terms;
pub mod tracks;
pub mod users;
