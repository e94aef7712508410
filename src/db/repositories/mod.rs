mod interruptions;
mod sessions;
