pub enum Action {
    Cancel(),
    Retry(),
    SetModel(String),
    Submit(String),
}
